//! Services Layer
//!
//! This module contains the bulk operation business logic, independent of
//! the HTTP layer. Handlers and the background worker both call into it.

pub mod bulk_operation_service;
pub mod bulk_worker;
pub mod export_format;
pub mod targets;

// Re-export for convenience
pub use bulk_operation_service::{BulkOperationService, CreateOperation, ExportArtifact};
pub use bulk_worker::run_worker;
pub use targets::{BulkTarget, SeaOrmTarget, TargetRegistry};
