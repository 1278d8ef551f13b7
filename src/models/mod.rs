pub mod bulk_operation;
pub mod patient;
pub mod procedure;
pub mod user;
