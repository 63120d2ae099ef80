mod records;
mod registry;
mod tables;

pub(crate) use records::{bind_values, fetch_all, find_id_by_column, is_blank, new_record_id, upsert_row};
pub(crate) use tables::read_schema;

use crate::errors::{AppError, AppResult};
use crate::models::EngineSettings;
use crate::policy::PolicyEngine;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");
const ENGINE_SETTINGS_KEY: &str = "engine";

/// Owns the SQLite connection. Every statement runs under the one mutex, so a
/// schema read and the write that depends on it cannot interleave with a migration.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    policy: PolicyEngine,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
            policy: PolicyEngine::new(),
        };

        db.ensure_builtin_modules()?;

        tracing::info!(path = %db.db_path.to_string_lossy(), "record database ready");
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn get_settings(&self) -> AppResult<EngineSettings> {
        let conn = self.lock()?;
        read_settings(&conn)
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<EngineSettings> {
        let conn = self.lock()?;
        let current = read_settings(&conn)?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: EngineSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::Validation(format!("invalid settings update: {}", error)))?;
        self.policy.validate_derived_rules(&settings.derived_rules())?;

        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![
                ENGINE_SETTINGS_KEY,
                serde_json::to_string(&settings)?,
                Utc::now().to_rfc3339()
            ],
        )?;

        tracing::info!(
            dedup_key = ?settings.import_dedup_key,
            extra_derived_rules = settings.extra_derived_fields.len(),
            "engine settings updated"
        );
        Ok(settings)
    }

    /// Runs `f` with the connection held for its whole duration.
    pub(crate) fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> AppResult<T>) -> AppResult<T> {
        let mut conn = self.lock()?;
        f(&mut conn)
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }
}

pub(crate) fn read_settings(conn: &Connection) -> AppResult<EngineSettings> {
    let raw = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?1",
            [ENGINE_SETTINGS_KEY],
            |row| row.get::<_, String>(0),
        )
        .optional()?;

    match raw {
        Some(raw) => Ok(serde_json::from_str::<EngineSettings>(&raw).unwrap_or_default()),
        None => Ok(EngineSettings::default()),
    }
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}
