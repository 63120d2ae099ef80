use super::tables::read_schema;
use super::{read_settings, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{ColumnInfo, FieldType, Record, SaveMode, TableSchema, TaskStatus, ID_COLUMN, STATUS_COLUMN};
use crate::otd::apply_derived_fields;
use crate::policy::quote_identifier;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

impl Database {
    /// Schema-checked full-row write. Keys outside the live schema are dropped;
    /// on update every column not supplied is written as NULL.
    pub fn save_record(&self, storage_id: &str, data: Record, mode: SaveMode) -> AppResult<Record> {
        let conn = self.lock()?;
        let schema = read_schema(&conn, storage_id)?;
        let settings = read_settings(&conn)?;

        let mut record = filter_to_schema(&schema, data);
        let id = match (mode, record_id(&record)) {
            (SaveMode::Create, Some(id)) => id,
            (SaveMode::Create, None) => new_record_id(),
            (SaveMode::Update, Some(id)) => id,
            (SaveMode::Update, None) => {
                return Err(AppError::Validation(
                    "An id is required to update a record".to_string(),
                ))
            }
        };
        record.insert(ID_COLUMN.to_string(), Value::String(id.clone()));
        apply_derived_fields(&mut record, &schema, &settings.derived_rules());
        let values = bind_values(&schema, &record)?;

        match mode {
            SaveMode::Create => {
                if row_exists(&conn, storage_id, &id)? {
                    return Err(AppError::Conflict(format!(
                        "Record '{}' already exists in '{}'",
                        id, storage_id
                    )));
                }
                conn.execute(&insert_sql("INSERT", &schema), rusqlite::params_from_iter(values))?;
            }
            SaveMode::Update => {
                let updated = conn.execute(&update_sql(&schema), rusqlite::params_from_iter(values))?;
                if updated == 0 {
                    return Err(AppError::NotFound(format!(
                        "Record '{}' not found in '{}'",
                        id, storage_id
                    )));
                }
            }
        }

        tracing::debug!(storage_id = %storage_id, record_id = %id, mode = ?mode, "record saved");
        fetch_record(&conn, &schema, &id)?
            .ok_or_else(|| AppError::Internal(format!("Record '{}' vanished after write", id)))
    }

    /// Every row of the module, in insertion order. Filtering is the caller's job.
    pub fn list_records(&self, storage_id: &str) -> AppResult<Vec<Record>> {
        let conn = self.lock()?;
        let schema = read_schema(&conn, storage_id)?;
        fetch_all(&conn, &schema)
    }

    pub fn get_record(&self, storage_id: &str, id: &str) -> AppResult<Option<Record>> {
        let conn = self.lock()?;
        let schema = read_schema(&conn, storage_id)?;
        fetch_record(&conn, &schema, id)
    }

    /// Writes only the status column; derived columns are not touched.
    pub fn update_status(&self, storage_id: &str, id: &str, status: TaskStatus) -> AppResult<()> {
        let conn = self.lock()?;
        let schema = read_schema(&conn, storage_id)?;
        if !schema.has_column(STATUS_COLUMN) {
            return Err(AppError::Validation(format!(
                "Module '{}' has no status field",
                storage_id
            )));
        }

        let sql = format!(
            "UPDATE {} SET {} = ?1 WHERE {} = ?2",
            quote_identifier(storage_id),
            quote_identifier(STATUS_COLUMN),
            quote_identifier(ID_COLUMN)
        );
        let updated = conn.execute(&sql, params![status.as_str(), id])?;
        if updated == 0 {
            return Err(AppError::NotFound(format!(
                "Record '{}' not found in '{}'",
                id, storage_id
            )));
        }
        Ok(())
    }
}

fn filter_to_schema(schema: &TableSchema, data: Record) -> Record {
    let mut record = Record::new();
    let mut dropped = Vec::new();
    for (key, value) in data {
        if schema.has_column(&key) {
            record.insert(key, value);
        } else {
            dropped.push(key);
        }
    }
    if !dropped.is_empty() {
        tracing::debug!(storage_id = %schema.storage_id, dropped = ?dropped, "ignored fields outside the module schema");
    }
    record
}

pub(crate) fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(_) => false,
    }
}

fn record_id(record: &Record) -> Option<String> {
    let value = record.get(ID_COLUMN);
    if is_blank(value) {
        return None;
    }
    match value {
        Some(Value::String(text)) => Some(text.trim().to_string()),
        Some(other) => Some(value_to_text(other)),
        None => None,
    }
}

pub(crate) fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Values in schema column order, coerced to each column's type. Missing keys bind NULL.
pub(crate) fn bind_values(schema: &TableSchema, record: &Record) -> AppResult<Vec<SqlValue>> {
    schema
        .columns
        .iter()
        .map(|column| to_sql_value(column, record.get(&column.name)))
        .collect()
}

fn to_sql_value(column: &ColumnInfo, value: Option<&Value>) -> AppResult<SqlValue> {
    let Some(value) = value else {
        return Ok(SqlValue::Null);
    };
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    if column.field_type == FieldType::Integer && !column.primary_key {
        return match value {
            Value::Number(number) => number.as_i64().map(SqlValue::Integer).ok_or_else(|| {
                AppError::Validation(format!("Field '{}' expects an integer, got {}", column.name, number))
            }),
            Value::Bool(flag) => Ok(SqlValue::Integer(i64::from(*flag))),
            Value::String(text) if text.trim().is_empty() => Ok(SqlValue::Null),
            Value::String(text) => text.trim().parse::<i64>().map(SqlValue::Integer).map_err(|_| {
                AppError::Validation(format!("Field '{}' expects an integer, got '{}'", column.name, text))
            }),
            other => Err(AppError::Validation(format!(
                "Field '{}' expects an integer, got {}",
                column.name, other
            ))),
        };
    }

    Ok(SqlValue::Text(value_to_text(value)))
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) => Value::from(number),
        ValueRef::Real(number) => serde_json::Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn select_sql(schema: &TableSchema) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|column| quote_identifier(&column.name))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {} FROM {}", columns, quote_identifier(&schema.storage_id))
}

fn insert_sql(verb: &str, schema: &TableSchema) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|column| quote_identifier(&column.name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=schema.columns.len())
        .map(|index| format!("?{}", index))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} INTO {} ({}) VALUES ({})",
        verb,
        quote_identifier(&schema.storage_id),
        columns,
        placeholders
    )
}

/// Binds the same values as `bind_values`; the id parameter doubles as the key.
fn update_sql(schema: &TableSchema) -> String {
    let assignments = schema
        .columns
        .iter()
        .enumerate()
        .map(|(index, column)| format!("{} = ?{}", quote_identifier(&column.name), index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let id_position = schema
        .columns
        .iter()
        .position(|column| column.name == ID_COLUMN)
        .map(|index| index + 1)
        .unwrap_or(1);
    format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote_identifier(&schema.storage_id),
        assignments,
        quote_identifier(ID_COLUMN),
        id_position
    )
}

fn map_row(schema: &TableSchema, row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let mut record = Record::new();
    for (index, column) in schema.columns.iter().enumerate() {
        record.insert(column.name.clone(), from_value_ref(row.get_ref(index)?));
    }
    Ok(record)
}

pub(crate) fn fetch_all(conn: &Connection, schema: &TableSchema) -> AppResult<Vec<Record>> {
    let mut statement = conn.prepare(&format!("{} ORDER BY rowid ASC", select_sql(schema)))?;
    let rows = statement
        .query_map([], |row| map_row(schema, row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn fetch_record(conn: &Connection, schema: &TableSchema, id: &str) -> AppResult<Option<Record>> {
    conn.query_row(
        &format!("{} WHERE {} = ?1", select_sql(schema), quote_identifier(ID_COLUMN)),
        [id],
        |row| map_row(schema, row),
    )
    .optional()
    .map_err(AppError::from)
}

pub(crate) fn row_exists(conn: &Connection, storage_id: &str, id: &str) -> AppResult<bool> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(1) FROM {} WHERE {} = ?1",
            quote_identifier(storage_id),
            quote_identifier(ID_COLUMN)
        ),
        [id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// First id whose `column` equals `value`. `column` must come from the live schema.
pub(crate) fn find_id_by_column(conn: &Connection, schema: &TableSchema, column: &str, value: &str) -> AppResult<Option<String>> {
    if !schema.has_column(column) {
        return Err(AppError::Validation(format!(
            "Field '{}' does not exist on '{}'",
            column, schema.storage_id
        )));
    }
    conn.query_row(
        &format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY rowid ASC LIMIT 1",
            quote_identifier(ID_COLUMN),
            quote_identifier(&schema.storage_id),
            quote_identifier(column)
        ),
        [value],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(AppError::from)
}

/// Insert, replacing any row with the same id. Returns true when a row was replaced.
pub(crate) fn upsert_row(conn: &Connection, schema: &TableSchema, id: &str, values: Vec<SqlValue>) -> AppResult<bool> {
    let replaced = row_exists(conn, &schema.storage_id, id)?;
    conn.execute(&insert_sql("INSERT OR REPLACE", schema), rusqlite::params_from_iter(values))?;
    Ok(replaced)
}
