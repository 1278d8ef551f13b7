pub mod bulk_operations;
pub mod health;

use axum::{
    Router,
    routing::{get, post},
};

use crate::infrastructure::AppState;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Bulk operations
        .route(
            "/bulk-operations",
            get(bulk_operations::list_operations).post(bulk_operations::create_operation),
        )
        .route("/bulk-operations/:id", get(bulk_operations::get_operation))
        .route(
            "/bulk-operations/:id/cancel",
            post(bulk_operations::cancel_operation),
        )
        .route(
            "/bulk-operations/:id/download",
            get(bulk_operations::download_export),
        )
        .with_state(state)
}
