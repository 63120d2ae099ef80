use crate::errors::{AppError, AppResult};
use crate::models::{Capability, CreateModulePayload, DerivedFieldRule, FieldDefinition, UserProfile, ID_COLUMN, STATUS_COLUMN};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,62}$").expect("valid regex"));

const MAX_DISPLAY_NAME_CHARS: usize = 80;
const MAX_DESCRIPTION_CHARS: usize = 500;
const MAX_FIELDS_PER_MODULE: usize = 64;

pub const REGISTRY_TABLE: &str = "modules";
pub const SETTINGS_TABLE: &str = "settings";

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    reserved_tables: BTreeSet<String>,
    reserved_fields: BTreeSet<String>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    pub fn new() -> Self {
        let reserved_tables = [REGISTRY_TABLE, SETTINGS_TABLE]
            .into_iter()
            .map(ToString::to_string)
            .collect();

        let reserved_fields = [ID_COLUMN, "rowid", "oid", "_rowid_"]
            .into_iter()
            .map(ToString::to_string)
            .collect();

        Self {
            reserved_tables,
            reserved_fields,
        }
    }

    /// Storage identifiers end up in DDL, so only the allowlisted shape passes.
    pub fn validate_storage_id(&self, storage_id: &str) -> AppResult<()> {
        validate_identifier(storage_id, "storage id")?;
        if storage_id.starts_with("sqlite_") || self.reserved_tables.contains(storage_id) {
            return Err(AppError::Validation(format!(
                "Storage id '{}' is reserved",
                storage_id
            )));
        }
        Ok(())
    }

    pub fn validate_field(&self, field: &FieldDefinition) -> AppResult<()> {
        validate_identifier(&field.name, "field name")?;
        if self.reserved_fields.contains(field.name.as_str()) {
            return Err(AppError::Validation(format!(
                "Field name '{}' is reserved",
                field.name
            )));
        }
        Ok(())
    }

    pub fn validate_create_module(&self, payload: &CreateModulePayload) -> AppResult<()> {
        self.validate_storage_id(&payload.storage_id)?;

        let display_name = payload.display_name.trim();
        if display_name.is_empty() {
            return Err(AppError::Validation("Module display name is required".to_string()));
        }
        if display_name.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(AppError::Validation(format!(
                "Module display name exceeds {} characters",
                MAX_DISPLAY_NAME_CHARS
            )));
        }
        if let Some(description) = &payload.description {
            if description.chars().count() > MAX_DESCRIPTION_CHARS {
                return Err(AppError::Validation(format!(
                    "Module description exceeds {} characters",
                    MAX_DESCRIPTION_CHARS
                )));
            }
        }

        if payload.fields.len() > MAX_FIELDS_PER_MODULE {
            return Err(AppError::Validation(format!(
                "A module may declare at most {} fields",
                MAX_FIELDS_PER_MODULE
            )));
        }

        let mut seen = BTreeSet::new();
        for field in &payload.fields {
            self.validate_field(field)?;
            if !seen.insert(field.name.as_str()) {
                return Err(AppError::Validation(format!(
                    "Field '{}' is declared more than once",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Checks the full rule set a save will run. Targets are overwritten on every
    /// write, so they may not be keys, the status, another rule's input or
    /// claimed by two rules.
    pub fn validate_derived_rules(&self, rules: &[DerivedFieldRule]) -> AppResult<()> {
        let mut inputs = BTreeSet::new();
        for rule in rules {
            validate_identifier(&rule.target, "derived field")?;
            validate_identifier(&rule.commitment, "commitment field")?;
            validate_identifier(&rule.actual, "actual field")?;
            inputs.insert(rule.commitment.as_str());
            inputs.insert(rule.actual.as_str());
        }

        let mut targets = BTreeSet::new();
        for rule in rules {
            let target = rule.target.as_str();
            if target == STATUS_COLUMN || self.reserved_fields.contains(target) {
                return Err(AppError::Validation(format!(
                    "Field '{}' cannot be a derived field",
                    target
                )));
            }
            if inputs.contains(target) {
                return Err(AppError::Validation(format!(
                    "Field '{}' is a date input and cannot be a derived field",
                    target
                )));
            }
            if !targets.insert(target) {
                return Err(AppError::Validation(format!(
                    "Derived field '{}' is declared more than once",
                    target
                )));
            }
        }
        Ok(())
    }

    pub fn require_capability(&self, user: &UserProfile, granted: bool, capability: Capability) -> AppResult<()> {
        if granted {
            return Ok(());
        }
        Err(AppError::Policy(format!(
            "User '{}' lacks the '{}' capability",
            user.username,
            capability.as_str()
        )))
    }
}

fn validate_identifier(raw: &str, label: &str) -> AppResult<()> {
    if IDENTIFIER_PATTERN.is_match(raw) {
        return Ok(());
    }
    Err(AppError::Validation(format!(
        "Invalid {} '{}': use 1-63 lowercase letters, digits or underscores, starting with a letter",
        label, raw
    )))
}

/// Double-quotes an identifier for SQL. Callers validate first; the escaping
/// keeps the statement well-formed for introspected names too.
pub fn quote_identifier(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}
