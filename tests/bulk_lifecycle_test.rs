use klinik_bulk::db;
use klinik_bulk::domain::{FilterOperator, FilterPredicate, OperationStatus, OperationType};
use klinik_bulk::infrastructure::storage::LocalExportStorage;
use klinik_bulk::models::{patient, procedure, user};
use klinik_bulk::seed;
use klinik_bulk::services::{BulkOperationService, CreateOperation, run_worker};
use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn setup(chunk_size: u64) -> (DatabaseConnection, Arc<BulkOperationService>, i32) {
    let db = db::init_db("sqlite::memory:")
        .await
        .expect("Failed to init DB");
    seed::seed_demo_data(&db).await.expect("Failed to seed");

    let admin = user::Entity::find()
        .all(&db)
        .await
        .unwrap()
        .into_iter()
        .find(|u| u.username == "admin")
        .expect("admin is seeded");

    let storage = LocalExportStorage::new(
        std::env::temp_dir().join(format!("klinik-lifecycle-{}", uuid::Uuid::new_v4())),
    );
    let service = Arc::new(BulkOperationService::new(
        db.clone(),
        Arc::new(storage),
        chunk_size,
    ));
    (db, service, admin.id)
}

async fn wait_for_terminal(service: &BulkOperationService, id: i32) -> OperationStatus {
    for _ in 0..200 {
        let op = service.get_operation(id).await.unwrap();
        if op.status.is_terminal() {
            return op.status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation {} never finished", id);
}

#[tokio::test]
async fn test_worker_completes_queued_operations() {
    let (db, service, owner_id) = setup(2).await;
    let total_procedures = procedure::Entity::find().count(&db).await.unwrap();
    assert!(total_procedures > 0);

    let approve = service
        .create_operation(CreateOperation {
            owner_id,
            operation_type: OperationType::Update,
            target_model: "Procedure".to_string(),
            payload: json!({"fields": {"status": "approved", "notes": "bulk approved"}}),
            filters: vec![FilterPredicate::new(
                "status",
                FilterOperator::Equals,
                json!("pending"),
            )],
        })
        .await
        .unwrap();
    let export = service
        .create_operation(CreateOperation {
            owner_id,
            operation_type: OperationType::Export,
            target_model: "Procedure".to_string(),
            payload: json!({"format": "json", "columns": ["id", "status"]}),
            filters: vec![],
        })
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(run_worker(
        Arc::clone(&service),
        Duration::from_millis(10),
        shutdown.clone(),
    ));

    assert_eq!(
        wait_for_terminal(&service, approve.id).await,
        OperationStatus::Completed
    );
    assert_eq!(
        wait_for_terminal(&service, export.id).await,
        OperationStatus::Completed
    );
    shutdown.cancel();
    worker.await.unwrap();

    let approve = service.get_operation(approve.id).await.unwrap();
    assert_eq!(approve.total_records, total_procedures);
    assert_eq!(
        approve.processed_records + approve.failed_records,
        approve.total_records
    );

    // Operations run oldest first, so the export sees the approved rows
    let artifact = service.download_export(export.id).await.unwrap();
    let rows: Vec<serde_json::Value> = serde_json::from_slice(&artifact.contents).unwrap();
    assert_eq!(rows.len() as u64, total_procedures);
    assert!(rows.iter().all(|r| r["status"] == "approved"));
}

#[tokio::test]
async fn test_procedure_delete_is_hard_delete() {
    let (db, service, owner_id) = setup(100).await;
    let before = procedure::Entity::find().count(&db).await.unwrap();

    let op = service
        .create_operation(CreateOperation {
            owner_id,
            operation_type: OperationType::Delete,
            target_model: "procedures".to_string(),
            payload: json!({}),
            filters: vec![FilterPredicate::new(
                "procedure_code",
                FilterOperator::Equals,
                json!("TD-001"),
            )],
        })
        .await
        .unwrap();

    let done = service.execute_operation(op.id).await.unwrap();
    assert_eq!(done.status, OperationStatus::Completed);
    assert!(done.total_records > 0);
    assert_eq!(
        procedure::Entity::find().count(&db).await.unwrap(),
        before - done.total_records
    );
}

#[tokio::test]
async fn test_soft_deleted_patients_are_skipped_by_later_operations() {
    let (db, service, owner_id) = setup(100).await;
    let patients = patient::Entity::find().count(&db).await.unwrap();

    let delete = service
        .create_operation(CreateOperation {
            owner_id,
            operation_type: OperationType::Delete,
            target_model: "Patient".to_string(),
            payload: json!({}),
            filters: vec![FilterPredicate::new("gender", FilterOperator::Equals, json!("M"))],
        })
        .await
        .unwrap();
    let deleted = service.execute_operation(delete.id).await.unwrap();
    assert_eq!(deleted.status, OperationStatus::Completed);

    let export = service
        .create_operation(CreateOperation {
            owner_id,
            operation_type: OperationType::Export,
            target_model: "Patient".to_string(),
            payload: json!({"columns": ["gender"]}),
            filters: vec![],
        })
        .await
        .unwrap();
    let exported = service.execute_operation(export.id).await.unwrap();
    assert_eq!(exported.total_records, patients - deleted.processed_records);

    let artifact = service.download_export(export.id).await.unwrap();
    let text = String::from_utf8(artifact.contents).unwrap();
    assert!(text.starts_with("gender\n"));
    assert!(!text.lines().any(|l| l == "M"));
}

#[tokio::test]
async fn test_cancelled_operation_is_never_picked_up() {
    let (db, service, owner_id) = setup(100).await;

    let op = service
        .create_operation(CreateOperation {
            owner_id,
            operation_type: OperationType::Update,
            target_model: "Patient".to_string(),
            payload: json!({"fields": {"status": "inactive"}}),
            filters: vec![FilterPredicate::new("status", FilterOperator::Equals, json!("active"))],
        })
        .await
        .unwrap();
    service.cancel_operation(op.id).await.unwrap();

    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(run_worker(
        Arc::clone(&service),
        Duration::from_millis(10),
        shutdown.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();
    worker.await.unwrap();

    let stored = service.get_operation(op.id).await.unwrap();
    assert_eq!(stored.status, OperationStatus::Cancelled);
    assert_eq!(stored.processed_records, 0);
    assert!(stored.started_at.is_none());

    let inactive = patient::Entity::find()
        .all(&db)
        .await
        .unwrap()
        .into_iter()
        .filter(|p| p.status == "inactive")
        .count();
    assert_eq!(inactive, 0);
}
