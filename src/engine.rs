use crate::analytics::{dashboard_summary, records_assigned_to, ASSIGNEE_COLUMN};
use crate::config::EngineConfig;
use crate::db::Database;
use crate::directory::{StaticUserDirectory, UserDirectory};
use crate::errors::{AppError, AppResult};
use crate::importer;
use crate::models::{
    AddFieldPayload, Capability, CreateModulePayload, DashboardSummary, EngineSettings, ImportOptions, ImportReport,
    MigrationOutcome, ModuleRecord, Record, SaveMode, TableSchema, TransitionOutcome, TransitionRequest, UserProfile,
};
use crate::policy::PolicyEngine;
use crate::transitions;
use serde_json::Value;
use std::sync::Arc;

/// Entry point for UI actions. Every call names the acting user and is checked
/// against the directory before it reaches storage.
pub struct OpsEngine {
    db: Arc<Database>,
    policy: PolicyEngine,
    directory: Arc<dyn UserDirectory>,
}

impl OpsEngine {
    pub fn new(db: Arc<Database>, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            db,
            policy: PolicyEngine::new(),
            directory,
        }
    }

    pub fn open(config: &EngineConfig) -> AppResult<Self> {
        let db = Database::new(&config.database_path)?;
        let directory = StaticUserDirectory::new(config.users.clone());
        tracing::info!(users = config.users.len(), "engine opened");
        Ok(Self::new(Arc::new(db), Arc::new(directory)))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn authorize(&self, actor: &str, capability: Capability) -> AppResult<UserProfile> {
        let user = self.directory.lookup(actor).ok_or_else(|| {
            tracing::warn!(actor = %actor, capability = capability.as_str(), "unknown user");
            AppError::Policy(format!("Unknown user '{}'", actor))
        })?;
        let granted = self.directory.has_capability(&user, capability);
        if !granted {
            tracing::warn!(actor = %actor, capability = capability.as_str(), "capability denied");
        }
        self.policy.require_capability(&user, granted, capability)?;
        Ok(user)
    }

    pub fn create_module(&self, actor: &str, payload: &CreateModulePayload) -> AppResult<ModuleRecord> {
        self.authorize(actor, Capability::ManageModules)?;
        self.db.create_module(payload)
    }

    pub fn add_field(&self, actor: &str, payload: &AddFieldPayload) -> AppResult<MigrationOutcome> {
        self.authorize(actor, Capability::ManageModules)?;
        self.db.add_field(&payload.storage_id, &payload.field)
    }

    pub fn list_modules(&self, actor: &str) -> AppResult<Vec<ModuleRecord>> {
        self.authorize(actor, Capability::ViewRecords)?;
        self.db.list_modules()
    }

    pub fn get_schema(&self, actor: &str, storage_id: &str) -> AppResult<TableSchema> {
        self.authorize(actor, Capability::ViewRecords)?;
        self.db.get_schema(storage_id)
    }

    pub fn save_record(&self, actor: &str, storage_id: &str, data: Record, mode: SaveMode) -> AppResult<Record> {
        self.authorize(actor, Capability::EditRecords)?;
        self.db.save_record(storage_id, data, mode)
    }

    pub fn list_records(&self, actor: &str, storage_id: &str) -> AppResult<Vec<Record>> {
        self.authorize(actor, Capability::ViewRecords)?;
        self.db.list_records(storage_id)
    }

    pub fn get_record(&self, actor: &str, storage_id: &str, id: &str) -> AppResult<Option<Record>> {
        self.authorize(actor, Capability::ViewRecords)?;
        self.db.get_record(storage_id, id)
    }

    /// Rows whose assignee is the actor's display name.
    pub fn my_records(&self, actor: &str, storage_id: &str) -> AppResult<Vec<Record>> {
        let user = self.authorize(actor, Capability::ViewRecords)?;
        let records = self.db.list_records(storage_id)?;
        Ok(records_assigned_to(&records, ASSIGNEE_COLUMN, &user.display_name))
    }

    pub fn members(&self, actor: &str) -> AppResult<Vec<UserProfile>> {
        self.authorize(actor, Capability::ViewRecords)?;
        Ok(self.directory.members())
    }

    pub fn import_csv(&self, actor: &str, storage_id: &str, text: &str, options: &ImportOptions) -> AppResult<ImportReport> {
        self.authorize(actor, Capability::ImportExport)?;
        importer::import_csv(&self.db, storage_id, text, options)
    }

    pub fn import_rows(
        &self,
        actor: &str,
        storage_id: &str,
        rows: Vec<Record>,
        options: &ImportOptions,
    ) -> AppResult<ImportReport> {
        self.authorize(actor, Capability::ImportExport)?;
        importer::import_rows(&self.db, storage_id, rows, options)
    }

    pub fn export_csv(&self, actor: &str, storage_id: &str) -> AppResult<String> {
        self.authorize(actor, Capability::ImportExport)?;
        importer::export_csv(&self.db, storage_id)
    }

    /// Users who cannot edit records may only move work assigned to them.
    pub fn transition_status(
        &self,
        actor: &str,
        storage_id: &str,
        record_id: &str,
        request: &TransitionRequest,
    ) -> AppResult<TransitionOutcome> {
        let user = self.authorize(actor, Capability::TransitionStatus)?;
        if !self.directory.has_capability(&user, Capability::EditRecords) {
            let record = self
                .db
                .get_record(storage_id, record_id)?
                .ok_or_else(|| AppError::NotFound(format!("Record '{}' not found in '{}'", record_id, storage_id)))?;
            let assignee = record.get(ASSIGNEE_COLUMN).and_then(Value::as_str).map(str::trim);
            if assignee != Some(user.display_name.trim()) {
                return Err(AppError::Policy(format!(
                    "User '{}' may only update records assigned to them",
                    user.username
                )));
            }
        }
        transitions::transition_status(&self.db, storage_id, record_id, request)
    }

    pub fn dashboard_summary(&self, actor: &str, storage_id: &str) -> AppResult<DashboardSummary> {
        self.authorize(actor, Capability::ViewRecords)?;
        let records = self.db.list_records(storage_id)?;
        Ok(dashboard_summary(&records))
    }

    pub fn get_settings(&self, actor: &str) -> AppResult<EngineSettings> {
        self.authorize(actor, Capability::ViewRecords)?;
        self.db.get_settings()
    }

    pub fn update_settings(&self, actor: &str, update: Value) -> AppResult<EngineSettings> {
        self.authorize(actor, Capability::ManageModules)?;
        self.db.update_settings(update)
    }
}
