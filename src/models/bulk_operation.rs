use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{BulkOperation, DomainError, FilterPredicate};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bulk_operations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub operation_type: String, // create, update, delete, export
    pub target_model: String,
    pub filters: String, // JSON array of predicates
    pub payload: String, // JSON object
    #[sea_orm(default_value = "pending")]
    pub status: String, // pending, processing, completed, failed, cancelled
    pub total_records: i64,
    pub processed_records: i64,
    pub failed_records: i64,
    pub error_message: Option<String>,
    pub file_path: Option<String>,
    pub owner_id: i32,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::OwnerId",
        to = "super::user::Column::Id"
    )]
    Owner,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Owner.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for BulkOperation {
    type Error = DomainError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let filters: Vec<FilterPredicate> = serde_json::from_str(&model.filters).map_err(|e| {
            DomainError::Internal(format!("operation {} has corrupt filters: {}", model.id, e))
        })?;
        let payload = serde_json::from_str(&model.payload).map_err(|e| {
            DomainError::Internal(format!("operation {} has corrupt payload: {}", model.id, e))
        })?;

        Ok(Self {
            id: model.id,
            operation_type: model.operation_type.parse()?,
            target_model: model.target_model,
            filters,
            payload,
            status: model.status.parse()?,
            total_records: model.total_records.max(0) as u64,
            processed_records: model.processed_records.max(0) as u64,
            failed_records: model.failed_records.max(0) as u64,
            error_message: model.error_message,
            file_path: model.file_path,
            owner_id: model.owner_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
            started_at: model.started_at,
            completed_at: model.completed_at,
        })
    }
}
