use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A generic row: column name to value. Always carries an `id` once persisted.
pub type Record = serde_json::Map<String, serde_json::Value>;

pub const ID_COLUMN: &str = "id";
pub const STATUS_COLUMN: &str = "status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    Text,
    Integer,
    Date,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Date => "date",
        }
    }

    /// Declared SQLite column type. Introspection maps it back via `from_declared`.
    /// `DATETEXT` carries TEXT affinity, so date strings are never turned into numbers.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Date => "DATETEXT",
        }
    }

    pub fn from_declared(raw: &str) -> Self {
        let upper = raw.to_ascii_uppercase();
        if upper.contains("INT") {
            Self::Integer
        } else if upper.contains("DATE") {
            Self::Date
        } else {
            Self::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldDefinition {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, FieldType::Date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub field_type: FieldType,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub storage_id: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    pub id: String,
    pub display_name: String,
    pub storage_id: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub builtin: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateModulePayload {
    pub display_name: String,
    pub storage_id: String,
    pub fields: Vec<FieldDefinition>,
    pub description: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFieldPayload {
    pub storage_id: String,
    pub field: FieldDefinition,
}

/// Result of an additive migration. Failures here are reported, not raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOutcome {
    pub success: bool,
    pub message: String,
}

impl MigrationOutcome {
    pub fn applied(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveMode {
    Create,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Hold,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [Self::Hold, Self::InProgress, Self::Completed, Self::Cancelled];

    /// Stored spelling, shared with rows written by earlier dashboard versions.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hold => "Hold",
            Self::InProgress => "Inprogress",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|ch| !ch.is_whitespace() && *ch != '_' && *ch != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "hold" | "onhold" => Some(Self::Hold),
            "inprogress" => Some(Self::InProgress),
            "completed" | "delivered" => Some(Self::Completed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnTimeDelivery {
    Ok,
    NotOk,
    NotApplicable,
}

impl OnTimeDelivery {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotOk => "NOT_OK",
            Self::NotApplicable => "NOT_APPLICABLE",
        }
    }
}

/// A derived OTD column and the date pair it is computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedFieldRule {
    pub target: String,
    pub commitment: String,
    pub actual: String,
}

impl DerivedFieldRule {
    pub fn new(target: &str, commitment: &str, actual: &str) -> Self {
        Self {
            target: target.to_string(),
            commitment: commitment.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Always applied. Settings can add rules next to these but never remove them.
    pub fn builtin() -> Vec<Self> {
        vec![
            Self::new("on_time_delivery", "commitment_date", "actual_date"),
            Self::new("otd_customer", "commitment_date_to_customer", "actual_delivery_date"),
            Self::new("otd_internal", "commitment_date_internal", "actual_delivery_date"),
        ]
    }

    pub fn applies_to(&self, schema: &TableSchema) -> bool {
        schema.has_column(&self.target) && schema.has_column(&self.commitment) && schema.has_column(&self.actual)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    pub import_dedup_key: Option<String>,
    pub neutralize_csv_formulas: bool,
    /// Rules evaluated after the built-in ones.
    pub extra_derived_fields: Vec<DerivedFieldRule>,
}

impl EngineSettings {
    pub fn derived_rules(&self) -> Vec<DerivedFieldRule> {
        DerivedFieldRule::builtin()
            .into_iter()
            .chain(self.extra_derived_fields.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportOptions {
    /// Column used to match id-less rows against existing ones. `None` keeps the
    /// insert-always behavior for rows without an id.
    pub dedup_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub total: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub generated_ids: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub status: TaskStatus,
    pub actual_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub record: Record,
    pub from_status: Option<TaskStatus>,
    pub to_status: TaskStatus,
    pub recomputed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Lead,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    ViewRecords,
    EditRecords,
    ManageModules,
    ImportExport,
    TransitionStatus,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ViewRecords => "view-records",
            Self::EditRecords => "edit-records",
            Self::ManageModules => "manage-modules",
            Self::ImportExport => "import-export",
            Self::TransitionStatus => "transition-status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub username: String,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub total: usize,
    pub hold: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub unknown: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPerformance {
    pub name: String,
    pub task_count: usize,
    pub completed: usize,
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyDeliveryStats {
    pub month: String,
    pub delivered: usize,
    pub otd_percent: f64,
    pub ftr_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyStatusCount {
    pub month: String,
    pub status: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub counts: StatusCounts,
    pub completion_percent: u32,
    pub members: Vec<MemberPerformance>,
    pub monthly_delivery: Vec<MonthlyDeliveryStats>,
    pub monthly_status: Vec<MonthlyStatusCount>,
}
