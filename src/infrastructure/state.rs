//! Application state containing the bulk operation service and shared resources

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::infrastructure::config::Config;
use crate::infrastructure::storage::LocalExportStorage;
use crate::services::BulkOperationService;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    db: DatabaseConnection,
    /// Bulk operation lifecycle, shared with the background worker
    pub bulk_service: Arc<BulkOperationService>,
}

impl AppState {
    /// Create a new AppState with exports stored under the configured directory
    pub fn new(db: DatabaseConnection, config: &Config) -> Self {
        let storage = Arc::new(LocalExportStorage::new(config.export_dir.clone()));
        let bulk_service = Arc::new(BulkOperationService::new(
            db.clone(),
            storage,
            config.chunk_size,
        ));
        Self::with_service(db, bulk_service)
    }

    pub fn with_service(db: DatabaseConnection, bulk_service: Arc<BulkOperationService>) -> Self {
        Self { db, bulk_service }
    }
}

// Implement FromRef to allow extracting DatabaseConnection from AppState
impl axum::extract::FromRef<AppState> for DatabaseConnection {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}
