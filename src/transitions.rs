use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{SaveMode, TaskStatus, TransitionOutcome, TransitionRequest, STATUS_COLUMN};
use serde_json::Value;
use std::collections::BTreeSet;

/// Moves a record to `request.status`.
///
/// With an actual date the full row is rewritten through `save_record`, so every
/// derived OTD column is recomputed. Without one only the status column changes
/// and derived columns keep whatever they held.
pub fn transition_status(
    db: &Database,
    storage_id: &str,
    record_id: &str,
    request: &TransitionRequest,
) -> AppResult<TransitionOutcome> {
    let schema = db.get_schema(storage_id)?;
    if !schema.has_column(STATUS_COLUMN) {
        return Err(AppError::Validation(format!(
            "Module '{}' has no status field",
            storage_id
        )));
    }

    let current = db
        .get_record(storage_id, record_id)?
        .ok_or_else(|| AppError::NotFound(format!("Record '{}' not found in '{}'", record_id, storage_id)))?;
    let from_status = current
        .get(STATUS_COLUMN)
        .and_then(Value::as_str)
        .and_then(TaskStatus::parse);
    let to_status = request.status;

    if let Some(from) = from_status.filter(|from| from.is_terminal() && *from != to_status) {
        tracing::warn!(
            storage_id = %storage_id,
            record_id = %record_id,
            from = from.as_str(),
            to = to_status.as_str(),
            "record reopened from a terminal status"
        );
    }

    let actual_date = request
        .actual_date
        .as_deref()
        .map(str::trim)
        .filter(|date| !date.is_empty());

    let (record, recomputed) = match actual_date {
        Some(date) => {
            let actual_columns: BTreeSet<String> = db
                .get_settings()?
                .derived_rules()
                .into_iter()
                .filter(|rule| rule.applies_to(&schema))
                .map(|rule| rule.actual)
                .collect();
            if actual_columns.is_empty() {
                return Err(AppError::Validation(format!(
                    "Module '{}' has no actual date field to record",
                    storage_id
                )));
            }

            let mut updated = current;
            updated.insert(STATUS_COLUMN.to_string(), Value::String(to_status.as_str().to_string()));
            for column in actual_columns {
                updated.insert(column, Value::String(date.to_string()));
            }
            (db.save_record(storage_id, updated, SaveMode::Update)?, true)
        }
        None => {
            db.update_status(storage_id, record_id, to_status)?;
            let record = db
                .get_record(storage_id, record_id)?
                .ok_or_else(|| AppError::NotFound(format!("Record '{}' not found in '{}'", record_id, storage_id)))?;
            (record, false)
        }
    };

    tracing::info!(
        storage_id = %storage_id,
        record_id = %record_id,
        from = from_status.map(TaskStatus::as_str).unwrap_or("unknown"),
        to = to_status.as_str(),
        recomputed,
        "status transition applied"
    );

    Ok(TransitionOutcome {
        record,
        from_status,
        to_status,
        recomputed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateModulePayload, FieldDefinition, Record};
    use serde_json::json;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        (dir, db)
    }

    fn late_task(db: &Database) {
        let record: Record = json!({
            "id": "t1",
            "task_name": "Harness drawing",
            "status": "Inprogress",
            "commitment_date_to_customer": "2024-05-10",
            "commitment_date_internal": "2024-05-08",
            "actual_delivery_date": "2024-05-15",
        })
        .as_object()
        .cloned()
        .expect("object");
        db.save_record("tasks", record, SaveMode::Create).expect("save");
    }

    #[test]
    fn completing_with_a_date_recomputes_otd() {
        let (_dir, db) = open();
        late_task(&db);
        assert_eq!(
            db.get_record("tasks", "t1").expect("get").expect("row")["otd_customer"],
            "NOT_OK"
        );

        let outcome = transition_status(
            &db,
            "tasks",
            "t1",
            &TransitionRequest {
                status: TaskStatus::Completed,
                actual_date: Some("2024-05-09".to_string()),
            },
        )
        .expect("transition");

        assert!(outcome.recomputed);
        assert_eq!(outcome.from_status, Some(TaskStatus::InProgress));
        assert_eq!(outcome.record["status"], "Completed");
        assert_eq!(outcome.record["actual_delivery_date"], "2024-05-09");
        assert_eq!(outcome.record["otd_customer"], "OK");
        assert_eq!(outcome.record["otd_internal"], "NOT_OK");
        assert_eq!(outcome.record["task_name"], "Harness drawing");
    }

    #[test]
    fn status_only_transition_keeps_derived_values() {
        let (_dir, db) = open();
        late_task(&db);

        let outcome = transition_status(
            &db,
            "tasks",
            "t1",
            &TransitionRequest {
                status: TaskStatus::Hold,
                actual_date: Some("   ".to_string()),
            },
        )
        .expect("transition");

        assert!(!outcome.recomputed);
        assert_eq!(outcome.record["status"], "Hold");
        assert_eq!(outcome.record["actual_delivery_date"], "2024-05-15");
        assert_eq!(outcome.record["otd_customer"], "NOT_OK");
    }

    #[test]
    fn reopening_a_completed_record_is_allowed() {
        let (_dir, db) = open();
        late_task(&db);
        let complete = TransitionRequest {
            status: TaskStatus::Completed,
            actual_date: None,
        };
        transition_status(&db, "tasks", "t1", &complete).expect("complete");

        let reopen = TransitionRequest {
            status: TaskStatus::InProgress,
            actual_date: None,
        };
        let outcome = transition_status(&db, "tasks", "t1", &reopen).expect("reopen");
        assert_eq!(outcome.from_status, Some(TaskStatus::Completed));
        assert_eq!(outcome.record["status"], "Inprogress");
    }

    #[test]
    fn missing_record_and_statusless_module_are_rejected() {
        let (_dir, db) = open();
        let request = TransitionRequest {
            status: TaskStatus::Completed,
            actual_date: None,
        };
        assert!(matches!(
            transition_status(&db, "tasks", "ghost", &request),
            Err(AppError::NotFound(_))
        ));

        db.create_module(&CreateModulePayload {
            display_name: "Inventory".to_string(),
            storage_id: "inventory".to_string(),
            fields: vec![FieldDefinition::text("item")],
            description: None,
            icon: None,
        })
        .expect("module");
        assert!(matches!(
            transition_status(&db, "inventory", "any", &request),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn dated_transition_needs_an_actual_date_field() {
        let (_dir, db) = open();
        let mut record = Record::new();
        record.insert("id".into(), "r1".into());
        record.insert("full_name".into(), "Ana".into());
        db.save_record("resources", record, SaveMode::Create).expect("save");

        let request = TransitionRequest {
            status: TaskStatus::Completed,
            actual_date: Some("2024-05-09".to_string()),
        };
        assert!(matches!(
            transition_status(&db, "resources", "r1", &request),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn rules_sharing_an_actual_date_all_recompute() {
        let (_dir, db) = open();
        db.create_module(&CreateModulePayload {
            display_name: "Reviews".to_string(),
            storage_id: "reviews".to_string(),
            fields: vec![
                FieldDefinition::date("commitment_date"),
                FieldDefinition::date("review_due"),
                FieldDefinition::date("actual_date"),
                FieldDefinition::text("on_time_delivery"),
                FieldDefinition::text("otd_review"),
                FieldDefinition::text("status"),
            ],
            description: None,
            icon: None,
        })
        .expect("module");
        db.update_settings(json!({
            "extraDerivedFields": [
                { "target": "otd_review", "commitment": "review_due", "actual": "actual_date" }
            ]
        }))
        .expect("settings");

        let record: Record = json!({
            "id": "r1",
            "status": "Inprogress",
            "commitment_date": "2024-05-10",
            "review_due": "2024-05-05",
        })
        .as_object()
        .cloned()
        .expect("object");
        db.save_record("reviews", record, SaveMode::Create).expect("save");

        let outcome = transition_status(
            &db,
            "reviews",
            "r1",
            &TransitionRequest {
                status: TaskStatus::Completed,
                actual_date: Some("2024-05-08".to_string()),
            },
        )
        .expect("transition");
        assert_eq!(outcome.record["actual_date"], "2024-05-08");
        assert_eq!(outcome.record["on_time_delivery"], "OK");
        assert_eq!(outcome.record["otd_review"], "NOT_OK");
    }
}
