use super::tables::{add_column, column_exists, create_table, table_exists};
use super::{parse_time, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{CreateModulePayload, FieldDefinition, ModuleRecord};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

const MODULE_COLUMNS: &str = "id, display_name, storage_id, description, icon, builtin, created_at";

impl Database {
    /// Creates the backing table and registers the module in one transaction.
    pub fn create_module(&self, payload: &CreateModulePayload) -> AppResult<ModuleRecord> {
        self.register_module(payload, false)
    }

    pub fn list_modules(&self) -> AppResult<Vec<ModuleRecord>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {} FROM modules ORDER BY created_at ASC, rowid ASC",
            MODULE_COLUMNS
        ))?;
        let modules = statement
            .query_map([], parse_module_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(modules)
    }

    pub fn get_module(&self, storage_id: &str) -> AppResult<Option<ModuleRecord>> {
        let conn = self.lock()?;
        find_module(&conn, storage_id)
    }

    fn register_module(&self, payload: &CreateModulePayload, builtin: bool) -> AppResult<ModuleRecord> {
        self.policy.validate_create_module(payload)?;

        let mut conn = self.lock()?;
        if find_module(&conn, &payload.storage_id)?.is_some() || table_exists(&conn, &payload.storage_id)? {
            return Err(AppError::Conflict(format!(
                "Storage id '{}' is already in use",
                payload.storage_id
            )));
        }

        let module = new_module_record(payload, builtin);
        let tx = conn.transaction()?;
        create_table(&tx, &payload.storage_id, &payload.fields)?;
        insert_module_row(&tx, &module)?;
        tx.commit()?;

        tracing::info!(
            storage_id = %module.storage_id,
            fields = payload.fields.len(),
            builtin,
            "module created"
        );
        Ok(module)
    }

    /// Seeds the built-in modules. A pre-existing table of the same name is
    /// adopted: it gets registered and receives any missing built-in columns.
    pub(super) fn ensure_builtin_modules(&self) -> AppResult<()> {
        for payload in builtin_modules() {
            let adopt = {
                let conn = self.lock()?;
                if find_module(&conn, &payload.storage_id)?.is_some() {
                    ensure_columns(&conn, &payload.storage_id, &payload.fields)?;
                    continue;
                }
                table_exists(&conn, &payload.storage_id)?
            };

            if adopt {
                let mut conn = self.lock()?;
                let tx = conn.transaction()?;
                ensure_columns(&tx, &payload.storage_id, &payload.fields)?;
                insert_module_row(&tx, &new_module_record(&payload, true))?;
                tx.commit()?;
                tracing::info!(storage_id = %payload.storage_id, "adopted existing table as built-in module");
            } else {
                self.register_module(&payload, true)?;
            }
        }
        Ok(())
    }
}

fn find_module(conn: &Connection, storage_id: &str) -> AppResult<Option<ModuleRecord>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM modules WHERE storage_id = ?1 COLLATE NOCASE",
            MODULE_COLUMNS
        ),
        [storage_id],
        parse_module_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn ensure_columns(conn: &Connection, storage_id: &str, fields: &[FieldDefinition]) -> AppResult<()> {
    for field in fields {
        if !column_exists(conn, storage_id, &field.name)? {
            add_column(conn, storage_id, field)?;
            tracing::info!(storage_id = %storage_id, field = %field.name, "backfilled built-in column");
        }
    }
    Ok(())
}

fn new_module_record(payload: &CreateModulePayload, builtin: bool) -> ModuleRecord {
    ModuleRecord {
        id: Uuid::new_v4().to_string(),
        display_name: payload.display_name.trim().to_string(),
        storage_id: payload.storage_id.clone(),
        description: payload.description.clone(),
        icon: payload.icon.clone(),
        builtin,
        created_at: Utc::now(),
    }
}

fn insert_module_row(conn: &Connection, module: &ModuleRecord) -> AppResult<()> {
    conn.execute(
        "INSERT INTO modules (id, display_name, storage_id, description, icon, builtin, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            module.id,
            module.display_name,
            module.storage_id,
            module.description,
            module.icon,
            module.builtin as i32,
            module.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn parse_module_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ModuleRecord> {
    Ok(ModuleRecord {
        id: row.get(0)?,
        display_name: row.get(1)?,
        storage_id: row.get(2)?,
        description: row.get(3)?,
        icon: row.get(4)?,
        builtin: row.get::<_, i32>(5)? != 0,
        created_at: parse_time(&row.get::<_, String>(6)?)?,
    })
}

fn builtin_modules() -> Vec<CreateModulePayload> {
    vec![
        CreateModulePayload {
            display_name: "Delivery Tasks".to_string(),
            storage_id: "tasks".to_string(),
            fields: vec![
                FieldDefinition::text("name_activity_pilot"),
                FieldDefinition::text("task_name"),
                FieldDefinition::date("date_of_receipt"),
                FieldDefinition::date("actual_delivery_date"),
                FieldDefinition::date("commitment_date_to_customer"),
                FieldDefinition::date("commitment_date_internal"),
                FieldDefinition::text("status"),
                FieldDefinition::text("ftr_customer"),
                FieldDefinition::text("reference_part_number"),
                FieldDefinition::text("ftr_internal"),
                FieldDefinition::text("otd_internal"),
                FieldDefinition::text("description_of_activity"),
                FieldDefinition::text("activity_type"),
                FieldDefinition::text("ftr_quality_gate_internal"),
                FieldDefinition::date("date_of_clarity_in_input"),
                FieldDefinition::date("start_date"),
                FieldDefinition::text("otd_customer"),
                FieldDefinition::text("customer_remarks"),
                FieldDefinition::text("name_quality_gate_referent"),
                FieldDefinition::text("project_lead"),
                FieldDefinition::text("customer_manager_name"),
            ],
            description: Some("Delivery tasks tracked against commitment dates".to_string()),
            icon: Some("clipboard-check".to_string()),
        },
        CreateModulePayload {
            display_name: "Training Catalog".to_string(),
            storage_id: "trainings".to_string(),
            fields: vec![
                FieldDefinition::text("title"),
                FieldDefinition::text("category"),
                FieldDefinition::text("trainer"),
                FieldDefinition::date("scheduled_date"),
                FieldDefinition::integer("duration_hours"),
                FieldDefinition::integer("capacity"),
                FieldDefinition::text("status"),
                FieldDefinition::text("notes"),
            ],
            description: Some("Trainings offered to the team".to_string()),
            icon: Some("graduation-cap".to_string()),
        },
        CreateModulePayload {
            display_name: "Onboarding & Resources".to_string(),
            storage_id: "resources".to_string(),
            fields: vec![
                FieldDefinition::text("full_name"),
                FieldDefinition::text("role_title"),
                FieldDefinition::text("team"),
                FieldDefinition::date("start_date"),
                FieldDefinition::text("mentor"),
                FieldDefinition::text("status"),
                FieldDefinition::text("equipment"),
                FieldDefinition::text("notes"),
            ],
            description: Some("Onboarding progress and assigned resources".to_string()),
            icon: Some("users".to_string()),
        },
    ]
}
