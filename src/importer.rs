use crate::db::{bind_values, fetch_all, find_id_by_column, is_blank, new_record_id, read_schema, read_settings, upsert_row, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{ImportOptions, ImportReport, Record, TableSchema, ID_COLUMN};
use crate::otd::apply_derived_fields;
use crate::tabular::{parse_csv, write_csv};
use serde_json::Value;
use std::collections::HashMap;

/// Upserts `rows` into `storage_id` in a single transaction. Any bad row rolls
/// back the whole batch.
pub fn import_rows(db: &Database, storage_id: &str, rows: Vec<Record>, options: &ImportOptions) -> AppResult<ImportReport> {
    let labelled = rows
        .into_iter()
        .enumerate()
        .map(|(index, row)| (format!("row {}", index + 1), row))
        .collect();
    import_batch(db, storage_id, labelled, options)
}

pub fn import_csv(db: &Database, storage_id: &str, text: &str, options: &ImportOptions) -> AppResult<ImportReport> {
    let table = parse_csv(text)?;
    let labelled = table
        .into_records()
        .into_iter()
        .map(|(line, row)| (format!("line {}", line), row))
        .collect();
    import_batch(db, storage_id, labelled, options)
}

/// Every current schema column, every row, in insertion order.
pub fn export_csv(db: &Database, storage_id: &str) -> AppResult<String> {
    db.with_connection(|conn| {
        let schema = read_schema(conn, storage_id)?;
        let settings = read_settings(conn)?;
        let rows = fetch_all(conn, &schema)?;
        tracing::info!(storage_id = %storage_id, rows = rows.len(), "module exported");
        Ok(write_csv(&schema.column_names(), &rows, settings.neutralize_csv_formulas))
    })
}

fn import_batch(
    db: &Database,
    storage_id: &str,
    rows: Vec<(String, Record)>,
    options: &ImportOptions,
) -> AppResult<ImportReport> {
    db.with_connection(|conn| {
        let schema = read_schema(conn, storage_id)?;
        let settings = read_settings(conn)?;
        let dedup_key = resolve_dedup_key(&schema, options, settings.import_dedup_key.as_deref())?;
        let rules = settings.derived_rules();

        let tx = conn.transaction()?;
        let mut report = ImportReport {
            total: rows.len(),
            ..ImportReport::default()
        };
        let mut batch_keys: HashMap<String, String> = HashMap::new();

        for (label, row) in rows {
            let mut record: Record = row.into_iter().filter(|(key, _)| schema.has_column(key)).collect();

            let key_value = dedup_key
                .as_deref()
                .filter(|key| !is_blank(record.get(*key)))
                .and_then(|key| record.get(key).map(|value| (key, text_of(value))));

            let id = if !is_blank(record.get(ID_COLUMN)) {
                record.get(ID_COLUMN).map(text_of).unwrap_or_default()
            } else {
                let matched = match &key_value {
                    Some((key, value)) => match batch_keys.get(value) {
                        Some(id) => Some(id.clone()),
                        None => find_id_by_column(&tx, &schema, key, value)?,
                    },
                    None => None,
                };
                matched.unwrap_or_else(|| {
                    report.generated_ids += 1;
                    new_record_id()
                })
            };
            if let Some((_, value)) = key_value {
                batch_keys.insert(value, id.clone());
            }

            record.insert(ID_COLUMN.to_string(), Value::String(id.clone()));
            apply_derived_fields(&mut record, &schema, &rules);
            let values = bind_values(&schema, &record).map_err(|error| row_error(&label, error))?;

            if upsert_row(&tx, &schema, &id, values)? {
                report.replaced += 1;
            } else {
                report.inserted += 1;
            }
        }

        tx.commit()?;
        tracing::info!(
            storage_id = %storage_id,
            total = report.total,
            inserted = report.inserted,
            replaced = report.replaced,
            generated_ids = report.generated_ids,
            "import committed"
        );
        Ok(report)
    })
}

/// An explicit key must exist on the module; the settings default is skipped
/// for modules that lack the column.
fn resolve_dedup_key(schema: &TableSchema, options: &ImportOptions, default_key: Option<&str>) -> AppResult<Option<String>> {
    if let Some(key) = options.dedup_key.as_deref() {
        if key == ID_COLUMN || !schema.has_column(key) {
            return Err(AppError::Validation(format!(
                "Dedup key '{}' is not a field of '{}'",
                key, schema.storage_id
            )));
        }
        return Ok(Some(key.to_string()));
    }

    match default_key {
        Some(key) if key != ID_COLUMN && schema.has_column(key) => Ok(Some(key.to_string())),
        Some(key) => {
            tracing::debug!(storage_id = %schema.storage_id, dedup_key = %key, "default dedup key not on module; ignored");
            Ok(None)
        }
        None => Ok(None),
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.trim().to_string(),
        other => other.to_string(),
    }
}

fn row_error(label: &str, error: AppError) -> AppError {
    let detail = match error {
        AppError::Validation(message) => message,
        other => other.to_string(),
    };
    AppError::Import(format!("{}: {}", label, detail))
}
