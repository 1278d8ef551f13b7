use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use klinik_bulk::config::{Config, DEFAULT_CHUNK_SIZE};
use klinik_bulk::db;
use klinik_bulk::infrastructure::AppState;
use klinik_bulk::server;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::{Value, json};
use std::time::Duration;
use tower::util::ServiceExt; // for `oneshot`

fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        port: 0,
        cors_allowed_origins: Vec::new(),
        profile: "test".to_string(),
        export_dir: std::env::temp_dir().join(format!("klinik-api-{}", uuid::Uuid::new_v4())),
        chunk_size: DEFAULT_CHUNK_SIZE,
        worker_poll_interval: Duration::from_millis(10),
        seed_demo: false,
    }
}

// Helper to create a test app with one operator and a few patients
async fn setup_test_app() -> (Router, AppState, i32) {
    let config = test_config();
    let db = db::init_db(&config.database_url)
        .await
        .expect("Failed to init DB");
    let owner_id = create_test_user(&db).await;
    create_test_patients(&db, 3).await;

    let state = AppState::new(db, &config);
    let app = server::build_router(state.clone(), &config.cors_allowed_origins);
    (app, state, owner_id)
}

async fn create_test_user(db: &DatabaseConnection) -> i32 {
    let now = chrono::Utc::now().to_rfc3339();
    let user = klinik_bulk::models::user::ActiveModel {
        username: Set("test_admin".to_string()),
        role: Set("admin".to_string()),
        created_at: Set(now.clone()),
        updated_at: Set(now),
        ..Default::default()
    };
    user.insert(db).await.expect("Failed to create user").id
}

async fn create_test_patients(db: &DatabaseConnection, count: usize) {
    let now = chrono::Utc::now().to_rfc3339();
    for i in 1..=count {
        klinik_bulk::models::patient::ActiveModel {
            medical_record_number: Set(format!("RM-{:04}", i)),
            name: Set(format!("Pasien {}", i)),
            status: Set("active".to_string()),
            created_at: Set(now.clone()),
            updated_at: Set(now.clone()),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("Failed to create patient");
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().uri(uri).method(method);
    let req = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("Response should be JSON")
}

#[tokio::test]
async fn test_health_check() {
    let (app, _, _) = setup_test_app().await;

    let (status, body) = send(&app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "ok");
}

#[tokio::test]
async fn test_create_and_view_operation() {
    let (app, _, owner_id) = setup_test_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/bulk-operations",
        Some(json!({
            "owner_id": owner_id,
            "operation_type": "update",
            "target_model": "Patient",
            "payload": {"fields": {"status": "inactive"}},
            "filters": [{"field": "id", "operator": ">=", "value": 2}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let created = json_body(&body);
    assert_eq!(created["operation"]["status"], "pending");
    assert_eq!(created["operation"]["progress_percentage"], 0.0);
    assert_eq!(created["operation"]["filters"][0]["operator"], "greater_or_equal");

    let id = created["operation"]["id"].as_i64().unwrap();
    let (status, body) = send(&app, "GET", &format!("/api/bulk-operations/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["operation"]["target_model"], "Patient");

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/bulk-operations?owner_id={}", owner_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["total"], 1);
}

#[tokio::test]
async fn test_invalid_requests_are_bad_requests() {
    let (app, _, owner_id) = setup_test_app().await;

    let cases = [
        // Delete without filters
        json!({
            "owner_id": owner_id,
            "operation_type": "delete",
            "target_model": "Patient",
            "payload": {}
        }),
        // Unknown operator
        json!({
            "owner_id": owner_id,
            "operation_type": "delete",
            "target_model": "Patient",
            "filters": [{"field": "id", "operator": "between", "value": [1, 2]}]
        }),
        // Unknown operation type
        json!({
            "owner_id": owner_id,
            "operation_type": "merge",
            "target_model": "Patient"
        }),
        // Unknown target
        json!({
            "owner_id": owner_id,
            "operation_type": "export",
            "target_model": "Invoice"
        }),
        // Missing target
        json!({
            "owner_id": owner_id,
            "operation_type": "export"
        }),
        // Owner of the wrong type
        json!({
            "owner_id": "admin",
            "operation_type": "export",
            "target_model": "Patient"
        }),
    ];

    for case in cases {
        let (status, body) = send(&app, "POST", "/api/bulk-operations", Some(case.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "case {}", case);
        assert!(json_body(&body)["error"].is_string());
    }

    let (_, body) = send(
        &app,
        "GET",
        &format!("/api/bulk-operations?owner_id={}", owner_id),
        None,
    )
    .await;
    assert_eq!(json_body(&body)["total"], 0);
}

#[tokio::test]
async fn test_unknown_operation_is_not_found() {
    let (app, _, _) = setup_test_app().await;

    for uri in [
        "/api/bulk-operations/999",
        "/api/bulk-operations/999/download",
    ] {
        let (status, _) = send(&app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
    }
    let (status, _) = send(&app, "POST", "/api/bulk-operations/999/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_twice_conflicts() {
    let (app, _, owner_id) = setup_test_app().await;

    let (_, body) = send(
        &app,
        "POST",
        "/api/bulk-operations",
        Some(json!({
            "owner_id": owner_id,
            "operation_type": "delete",
            "target_model": "patients",
            "filters": [{"field": "id", "operator": "=", "value": 1}]
        })),
    )
    .await;
    let id = json_body(&body)["operation"]["id"].as_i64().unwrap();

    let uri = format!("/api/bulk-operations/{}/cancel", id);
    let (status, body) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["operation"]["status"], "cancelled");

    let (status, _) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_download_completed_export() {
    let (app, state, owner_id) = setup_test_app().await;

    let (_, body) = send(
        &app,
        "POST",
        "/api/bulk-operations",
        Some(json!({
            "owner_id": owner_id,
            "operation_type": "export",
            "target_model": "Patient",
            "payload": {"format": "csv", "columns": ["medical_record_number", "name"]},
            "filters": [{"field": "id", "operator": "in", "value": [1, 3]}]
        })),
    )
    .await;
    let id = json_body(&body)["operation"]["id"].as_i64().unwrap() as i32;

    // Not downloadable until it completes
    let uri = format!("/api/bulk-operations/{}/download", id);
    let (status, _) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let done = state.bulk_service.execute_operation(id).await.unwrap();
    assert_eq!(done.processed_records, 2);

    let req = Request::builder().uri(&uri).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/csv; charset=utf-8"
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"patients_"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(
        String::from_utf8(body.to_vec()).unwrap(),
        "medical_record_number,name\nRM-0001,Pasien 1\nRM-0003,Pasien 3\n"
    );
}
