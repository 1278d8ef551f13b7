use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub username: String,
    #[sea_orm(default_value = "staff")]
    pub role: String, // admin, staff
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::bulk_operation::Entity")]
    BulkOperations,
}

impl Related<super::bulk_operation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BulkOperations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
