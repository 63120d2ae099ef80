use super::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{ColumnInfo, FieldDefinition, FieldType, MigrationOutcome, TableSchema, ID_COLUMN};
use crate::policy::quote_identifier;
use rusqlite::Connection;

impl Database {
    /// Live column list of a module table. Read from SQLite on every call.
    pub fn get_schema(&self, storage_id: &str) -> AppResult<TableSchema> {
        let conn = self.lock()?;
        read_schema(&conn, storage_id)
    }

    /// Adds a nullable column. Bad identifiers, unknown tables and existing
    /// columns come back as an unsuccessful outcome instead of an error.
    pub fn add_field(&self, storage_id: &str, field: &FieldDefinition) -> AppResult<MigrationOutcome> {
        if let Err(error) = self.policy.validate_storage_id(storage_id) {
            return Ok(MigrationOutcome::rejected(error.to_string()));
        }
        if let Err(error) = self.policy.validate_field(field) {
            return Ok(MigrationOutcome::rejected(error.to_string()));
        }

        let conn = self.lock()?;
        if !table_exists(&conn, storage_id)? {
            return Ok(MigrationOutcome::rejected(format!("Unknown module '{}'", storage_id)));
        }
        if column_exists(&conn, storage_id, &field.name)? {
            return Ok(MigrationOutcome::rejected(format!(
                "Field '{}' already exists on '{}'",
                field.name, storage_id
            )));
        }

        add_column(&conn, storage_id, field)?;
        tracing::info!(
            storage_id = %storage_id,
            field = %field.name,
            field_type = field.field_type.as_str(),
            "module field added"
        );
        Ok(MigrationOutcome::applied(format!(
            "Added field '{}' to '{}'",
            field.name, storage_id
        )))
    }
}

pub(crate) fn read_schema(conn: &Connection, storage_id: &str) -> AppResult<TableSchema> {
    let mut stmt = conn.prepare("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid ASC")?;
    let columns = stmt
        .query_map([storage_id], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                field_type: FieldType::from_declared(&row.get::<_, String>(1)?),
                primary_key: row.get::<_, i64>(2)? > 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        return Err(AppError::NotFound(format!("Module table '{}' does not exist", storage_id)));
    }

    Ok(TableSchema {
        storage_id: storage_id.to_string(),
        columns,
    })
}

/// Case-insensitive, matching how SQLite resolves table names.
pub(crate) fn table_exists(conn: &Connection, name: &str) -> AppResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(1) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn column_exists(conn: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(1) FROM pragma_table_info(?1) WHERE name = ?2 COLLATE NOCASE",
        [table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Identifiers must already have passed `PolicyEngine` validation.
pub(crate) fn create_table(conn: &Connection, storage_id: &str, fields: &[FieldDefinition]) -> AppResult<()> {
    conn.execute_batch(&create_table_sql(storage_id, fields))?;
    Ok(())
}

pub(crate) fn add_column(conn: &Connection, storage_id: &str, field: &FieldDefinition) -> AppResult<()> {
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_identifier(storage_id),
        quote_identifier(&field.name),
        field.field_type.sql_type()
    );
    conn.execute(&sql, [])?;
    Ok(())
}

fn create_table_sql(storage_id: &str, fields: &[FieldDefinition]) -> String {
    let mut columns = vec![format!("{} TEXT PRIMARY KEY", quote_identifier(ID_COLUMN))];
    columns.extend(
        fields
            .iter()
            .map(|field| format!("{} {}", quote_identifier(&field.name), field.field_type.sql_type())),
    );
    format!(
        "CREATE TABLE {} ({});",
        quote_identifier(storage_id),
        columns.join(", ")
    )
}
