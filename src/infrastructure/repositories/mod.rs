//! Repository implementations using SeaORM

pub mod bulk_operation_repository;
pub mod user_repository;

pub use bulk_operation_repository::SeaOrmBulkOperationRepository;
pub use user_repository::SeaOrmUserRepository;
