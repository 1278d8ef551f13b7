//! Repository trait definitions
//!
//! These traits define the contract for data access.
//! Implementations live in the infrastructure layer.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::DomainError;
use super::bulk::{FilterPredicate, OperationStatus, OperationType};

/// Bulk operation record as seen by services and API handlers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkOperation {
    pub id: i32,
    pub operation_type: OperationType,
    pub target_model: String,
    pub filters: Vec<FilterPredicate>,
    pub payload: Value,
    pub status: OperationStatus,
    pub total_records: u64,
    pub processed_records: u64,
    pub failed_records: u64,
    pub error_message: Option<String>,
    pub file_path: Option<String>,
    pub owner_id: i32,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl BulkOperation {
    /// Share of the target set handled so far, 0-100
    pub fn progress_percentage(&self) -> f64 {
        if self.total_records == 0 {
            return if self.status == OperationStatus::Completed {
                100.0
            } else {
                0.0
            };
        }
        let done = (self.processed_records + self.failed_records) as f64;
        (done / self.total_records as f64 * 100.0).min(100.0)
    }
}

/// Input for persisting a freshly validated operation
#[derive(Debug, Clone)]
pub struct NewBulkOperation {
    pub owner_id: i32,
    pub operation_type: OperationType,
    pub target_model: String,
    pub filters: Vec<FilterPredicate>,
    pub payload: Value,
}

/// Extra fields written together with a status transition
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    pub error_message: Option<String>,
    pub file_path: Option<String>,
}

/// Repository trait for BulkOperation records
#[async_trait]
pub trait BulkOperationRepository: Send + Sync {
    /// Insert a new record in `pending` with zeroed counters
    async fn insert(&self, input: NewBulkOperation) -> Result<BulkOperation, DomainError>;

    /// Find a record by ID
    async fn find_by_id(&self, id: i32) -> Result<Option<BulkOperation>, DomainError>;

    /// All records created by an owner, newest first
    async fn find_by_owner(&self, owner_id: i32) -> Result<Vec<BulkOperation>, DomainError>;

    /// Oldest record still waiting in `pending`
    async fn find_next_pending(&self) -> Result<Option<BulkOperation>, DomainError>;

    /// Move a record into `to` if it currently sits in one of `to`'s
    /// predecessor states. Returns false when the record was not eligible.
    async fn transition(
        &self,
        id: i32,
        to: OperationStatus,
        update: TransitionUpdate,
    ) -> Result<bool, DomainError>;

    /// Fail every record left in `processing` by a run that no longer exists.
    /// Returns the ids that were failed.
    async fn fail_interrupted(&self, reason: &str) -> Result<Vec<i32>, DomainError>;
}

/// Repository trait for operators owning bulk operations
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn exists(&self, id: i32) -> Result<bool, DomainError>;
}

/// Durable storage for export artifacts
#[async_trait]
pub trait ExportStorage: Send + Sync {
    /// Store an artifact under `name`, returning its location
    async fn put(&self, name: &str, contents: Vec<u8>) -> Result<String, DomainError>;

    /// Load an artifact by location; `None` when it no longer exists
    async fn get(&self, location: &str) -> Result<Option<Vec<u8>>, DomainError>;

    /// Drop an artifact that will never be served; missing is not an error
    async fn remove(&self, location: &str) -> Result<(), DomainError>;
}
