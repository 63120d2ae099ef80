use ops_records::models::{
    AddFieldPayload, CreateModulePayload, FieldDefinition, ImportOptions, OnTimeDelivery, Record, Role, SaveMode,
    TaskStatus, TransitionRequest, UserProfile,
};
use ops_records::{otd, AppError, EngineConfig, OpsEngine};
use serde_json::json;

const LEAD: &str = "lead";

fn engine() -> (tempfile::TempDir, OpsEngine) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = EngineConfig {
        database_path: dir.path().join("data").join("opsdash.db"),
        users: vec![
            UserProfile {
                username: LEAD.to_string(),
                display_name: "Team Lead".to_string(),
                role: Role::Lead,
            },
            UserProfile {
                username: "sara".to_string(),
                display_name: "Sara".to_string(),
                role: Role::Member,
            },
        ],
        ..EngineConfig::default()
    };
    let engine = OpsEngine::open(&config).expect("open engine");
    (dir, engine)
}

fn record(value: serde_json::Value) -> Record {
    value.as_object().cloned().expect("object")
}

fn save_task(engine: &OpsEngine, commitment: &str, actual: Option<&str>) -> Record {
    let mut data = record(json!({
        "task_name": "Harness drawing",
        "status": "Inprogress",
        "name_activity_pilot": "Sara",
        "commitment_date_to_customer": commitment,
    }));
    if let Some(actual) = actual {
        data.insert("actual_delivery_date".into(), actual.into());
    }
    engine
        .save_record(LEAD, "tasks", data, SaveMode::Create)
        .expect("save task")
}

#[test]
fn scenario_a_early_delivery_is_ok() {
    let (_dir, engine) = engine();
    let saved = save_task(&engine, "2024-05-10", Some("2024-05-08"));
    assert_eq!(saved["otd_customer"], OnTimeDelivery::Ok.as_str());
}

#[test]
fn scenario_b_late_delivery_is_not_ok() {
    let (_dir, engine) = engine();
    let saved = save_task(&engine, "2024-05-10", Some("2024-05-15"));
    assert_eq!(saved["otd_customer"], "NOT_OK");
}

#[test]
fn scenario_c_missing_actual_is_not_applicable() {
    let (_dir, engine) = engine();
    let saved = save_task(&engine, "2024-05-10", None);
    assert_eq!(saved["otd_customer"], "NOT_APPLICABLE");
}

#[test]
fn scenario_d_transition_with_new_date_recomputes() {
    let (_dir, engine) = engine();
    let saved = save_task(&engine, "2024-05-10", Some("2024-05-15"));
    let id = saved["id"].as_str().expect("id");

    let outcome = engine
        .transition_status(
            "sara",
            "tasks",
            id,
            &TransitionRequest {
                status: TaskStatus::Completed,
                actual_date: Some("2024-05-09".to_string()),
            },
        )
        .expect("transition");

    assert_eq!(outcome.record["otd_customer"], "OK");
    let stored = engine.get_record(LEAD, "tasks", id).expect("get").expect("row");
    assert_eq!(stored["otd_customer"], "OK");
    assert_eq!(stored["status"], "Completed");
}

#[test]
fn scenario_e_id_less_import_twice_doubles_rows() {
    let (_dir, engine) = engine();
    let csv = "task_name,commitment_date_to_customer\nA,2024-05-01\nB,2024-05-02\nC,2024-05-03\n";
    engine
        .import_csv(LEAD, "tasks", csv, &ImportOptions::default())
        .expect("first import");
    engine
        .import_csv(LEAD, "tasks", csv, &ImportOptions::default())
        .expect("second import");
    assert_eq!(engine.list_records(LEAD, "tasks").expect("list").len(), 6);
}

#[test]
fn evaluator_truth_table() {
    assert_eq!(otd::evaluate(Some("2024-05-10"), Some("2024-05-10")), OnTimeDelivery::Ok);
    assert_eq!(otd::evaluate(Some("10/05/2024"), Some("2024-05-11 08:30:00")), OnTimeDelivery::NotOk);
    assert_eq!(otd::evaluate(Some("2024-05-10"), Some("")), OnTimeDelivery::NotApplicable);
    assert_eq!(otd::evaluate(Some("not a date"), Some("2024-05-01")), OnTimeDelivery::NotApplicable);
    assert_eq!(otd::evaluate(None, None), OnTimeDelivery::NotApplicable);
}

#[test]
fn import_with_ids_is_idempotent() {
    let (_dir, engine) = engine();
    let first = "id,task_name\nt1,first\n";
    let second = "id,task_name\nt1,second\n";
    engine
        .import_csv(LEAD, "tasks", first, &ImportOptions::default())
        .expect("first");
    engine
        .import_csv(LEAD, "tasks", second, &ImportOptions::default())
        .expect("second");

    let rows = engine.list_records(LEAD, "tasks").expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["task_name"], "second");
}

#[test]
fn new_module_evolves_without_losing_rows() {
    let (_dir, engine) = engine();
    engine
        .create_module(
            LEAD,
            &CreateModulePayload {
                display_name: "Supplier Audits".to_string(),
                storage_id: "supplier_audits".to_string(),
                fields: vec![FieldDefinition::text("supplier"), FieldDefinition::integer("score")],
                description: None,
                icon: None,
            },
        )
        .expect("create module");
    let saved = engine
        .save_record(
            LEAD,
            "supplier_audits",
            record(json!({ "supplier": "Acme", "score": 87 })),
            SaveMode::Create,
        )
        .expect("save");

    let outcome = engine
        .add_field(
            LEAD,
            &AddFieldPayload {
                storage_id: "supplier_audits".to_string(),
                field: FieldDefinition::date("audited_on"),
            },
        )
        .expect("add field");
    assert!(outcome.success, "{}", outcome.message);

    let rows = engine.list_records(LEAD, "supplier_audits").expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], saved["id"]);
    assert_eq!(rows[0]["supplier"], "Acme");
    assert_eq!(rows[0]["score"], 87);
    assert!(rows[0]["audited_on"].is_null());

    let duplicate = engine.create_module(
        LEAD,
        &CreateModulePayload {
            display_name: "Again".to_string(),
            storage_id: "supplier_audits".to_string(),
            fields: Vec::new(),
            description: None,
            icon: None,
        },
    );
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));
}

#[test]
fn export_import_round_trip_preserves_ids_and_values() {
    let (_dir, engine) = engine();
    save_task(&engine, "2024-05-10", Some("2024-05-08"));
    save_task(&engine, "2024-05-10", None);
    let before = engine.list_records(LEAD, "tasks").expect("list");
    let csv = engine.export_csv(LEAD, "tasks").expect("export");

    let (_other_dir, other) = crate::engine();
    let report = other
        .import_csv(LEAD, "tasks", &csv, &ImportOptions::default())
        .expect("import");
    assert_eq!(report.generated_ids, 0);
    assert_eq!(other.list_records(LEAD, "tasks").expect("list"), before);
}

#[test]
fn builtin_derived_rules_survive_settings_updates() {
    let (_dir, engine) = engine();
    engine
        .update_settings(LEAD, json!({ "extraDerivedFields": [], "derivedFields": [] }))
        .expect("update settings");

    let saved = engine
        .save_record(
            LEAD,
            "tasks",
            record(json!({
                "commitment_date_to_customer": "2024-05-10",
                "actual_delivery_date": "2024-05-15",
                "otd_customer": "OK",
            })),
            SaveMode::Create,
        )
        .expect("save");
    assert_eq!(saved["otd_customer"], "NOT_OK");

    let hijack = engine.update_settings(
        LEAD,
        json!({ "extraDerivedFields": [
            { "target": "otd_customer", "commitment": "commitment_date_internal", "actual": "start_date" }
        ] }),
    );
    assert!(matches!(hijack, Err(AppError::Validation(_))));
    assert!(matches!(
        engine.update_settings("sara", json!({ "extraDerivedFields": [] })),
        Err(AppError::Policy(_))
    ));
}

fn create_delivery_module(engine: &OpsEngine) {
    engine
        .create_module(
            LEAD,
            &CreateModulePayload {
                display_name: "Deliveries".to_string(),
                storage_id: "deliveries".to_string(),
                fields: vec![
                    FieldDefinition::text("title"),
                    FieldDefinition::date("commitment_date"),
                    FieldDefinition::date("actual_date"),
                    FieldDefinition::text("on_time_delivery"),
                    FieldDefinition::text("status"),
                    FieldDefinition::text("name_activity_pilot"),
                ],
                description: None,
                icon: None,
            },
        )
        .expect("create module");
}

#[test]
fn generic_task_shape_derives_on_time_delivery() {
    let (_dir, engine) = engine();
    create_delivery_module(&engine);

    let early = engine
        .save_record(
            LEAD,
            "deliveries",
            record(json!({ "title": "A", "commitment_date": "2024-05-10", "actual_date": "2024-05-08" })),
            SaveMode::Create,
        )
        .expect("scenario A");
    assert_eq!(early["on_time_delivery"], "OK");

    let late = engine
        .save_record(
            LEAD,
            "deliveries",
            record(json!({
                "title": "B",
                "status": "Inprogress",
                "name_activity_pilot": "Sara",
                "commitment_date": "2024-05-10",
                "actual_date": "2024-05-15",
                "on_time_delivery": "OK",
            })),
            SaveMode::Create,
        )
        .expect("scenario B");
    assert_eq!(late["on_time_delivery"], "NOT_OK");
    let late_id = late["id"].as_str().expect("id").to_string();

    let pending = engine
        .save_record(
            LEAD,
            "deliveries",
            record(json!({ "title": "C", "commitment_date": "2024-05-10" })),
            SaveMode::Create,
        )
        .expect("scenario C");
    assert_eq!(pending["on_time_delivery"], "NOT_APPLICABLE");

    let mut corrected = late.clone();
    corrected.insert("actual_date".into(), "2024-05-09".into());
    let updated = engine
        .save_record(LEAD, "deliveries", corrected, SaveMode::Update)
        .expect("scenario D by update");
    assert_eq!(updated["on_time_delivery"], "OK");

    let outcome = engine
        .transition_status(
            "sara",
            "deliveries",
            &late_id,
            &TransitionRequest {
                status: TaskStatus::Completed,
                actual_date: Some("2024-05-12".to_string()),
            },
        )
        .expect("transition");
    assert_eq!(outcome.record["actual_date"], "2024-05-12");
    assert_eq!(outcome.record["on_time_delivery"], "NOT_OK");

    let csv = "id,title,commitment_date,actual_date,on_time_delivery\n\
               d9,Imported,2024-05-10,2024-05-15,OK\n";
    engine
        .import_csv(LEAD, "deliveries", csv, &ImportOptions::default())
        .expect("import");
    let imported = engine
        .get_record(LEAD, "deliveries", "d9")
        .expect("get")
        .expect("row");
    assert_eq!(imported["on_time_delivery"], "NOT_OK");
}
