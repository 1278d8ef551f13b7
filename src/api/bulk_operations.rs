//! Bulk operation API handlers

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::{BulkOperation, DomainError, FilterPredicate, OperationType};
use crate::infrastructure::AppState;
use crate::services::CreateOperation;

/// Record plus derived progress, as shown on the progress page
#[derive(Debug, Serialize)]
pub struct BulkOperationView {
    #[serde(flatten)]
    pub operation: BulkOperation,
    pub progress_percentage: f64,
}

impl From<BulkOperation> for BulkOperationView {
    fn from(operation: BulkOperation) -> Self {
        let progress_percentage = operation.progress_percentage();
        Self {
            operation,
            progress_percentage,
        }
    }
}

fn error_response(e: DomainError) -> Response {
    let status = match &e {
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::InvalidState(_) => StatusCode::CONFLICT,
        DomainError::Database(_) | DomainError::Storage(_) | DomainError::Internal(_) => {
            tracing::error!("Bulk operation request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({"error": e.to_string()}))).into_response()
}

/// Request DTO for creating a bulk operation
#[derive(Debug, Deserialize)]
pub struct CreateBulkOperationRequest {
    pub owner_id: i32,
    pub operation_type: String,
    pub target_model: String,
    #[serde(default)]
    pub payload: Value,
    /// Parsed by hand so a bad predicate is a 400 with our error body
    #[serde(default)]
    pub filters: Value,
}

impl TryFrom<CreateBulkOperationRequest> for CreateOperation {
    type Error = DomainError;

    fn try_from(request: CreateBulkOperationRequest) -> Result<Self, Self::Error> {
        let operation_type: OperationType = request.operation_type.parse()?;
        let filters: Vec<FilterPredicate> = match request.filters {
            Value::Null => Vec::new(),
            value => serde_json::from_value(value)
                .map_err(|e| DomainError::Validation(format!("invalid filters: {}", e)))?,
        };

        Ok(CreateOperation {
            owner_id: request.owner_id,
            operation_type,
            target_model: request.target_model,
            payload: request.payload,
            filters,
        })
    }
}

pub async fn create_operation(
    State(state): State<AppState>,
    payload: Result<Json<CreateBulkOperationRequest>, JsonRejection>,
) -> Response {
    // Missing or mistyped fields get the same 400 body as any other bad request
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(DomainError::Validation(rejection.body_text()));
        }
    };
    let request = match CreateOperation::try_from(payload) {
        Ok(request) => request,
        Err(e) => return error_response(e),
    };

    match state.bulk_service.create_operation(request).await {
        Ok(op) => (
            StatusCode::CREATED,
            Json(json!({
                "operation": BulkOperationView::from(op),
                "message": "Bulk operation queued"
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListOperationsParams {
    pub owner_id: i32,
}

pub async fn list_operations(
    State(state): State<AppState>,
    Query(params): Query<ListOperationsParams>,
) -> Response {
    match state.bulk_service.list_operations(params.owner_id).await {
        Ok(ops) => {
            let views: Vec<BulkOperationView> = ops.into_iter().map(Into::into).collect();
            Json(json!({
                "total": views.len(),
                "operations": views
            }))
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn get_operation(State(state): State<AppState>, Path(id): Path<i32>) -> Response {
    match state.bulk_service.get_operation(id).await {
        Ok(op) => Json(json!({"operation": BulkOperationView::from(op)})).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn cancel_operation(State(state): State<AppState>, Path(id): Path<i32>) -> Response {
    match state.bulk_service.cancel_operation(id).await {
        Ok(op) => Json(json!({
            "operation": BulkOperationView::from(op),
            "message": "Bulk operation cancelled"
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn download_export(State(state): State<AppState>, Path(id): Path<i32>) -> Response {
    match state.bulk_service.download_export(id).await {
        Ok(artifact) => (
            [
                (header::CONTENT_TYPE, artifact.content_type.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", artifact.file_name),
                ),
            ],
            artifact.contents,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}
