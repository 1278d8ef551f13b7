//! Domain layer - Pure business abstractions
//!
//! This layer contains NO framework dependencies (no SeaORM, no Axum).
//! Only operation vocabulary, schemas, trait definitions and domain error types.

pub mod bulk;
pub mod errors;
pub mod repositories;
pub mod schema;

pub use bulk::*;
pub use errors::DomainError;
pub use repositories::*;
pub use schema::*;
