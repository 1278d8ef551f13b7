use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{FieldKind, FieldSpec, TargetSchema};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "patients")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub medical_record_number: String,
    pub name: String,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[sea_orm(default_value = "active")]
    pub status: String, // active, inactive
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::procedure::Entity")]
    Procedures,
}

impl Related<super::procedure::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Procedures.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

pub const SCHEMA: TargetSchema = TargetSchema {
    name: "Patient",
    table: "patients",
    fields: &[
        FieldSpec::read_only("id", FieldKind::Integer, false),
        FieldSpec::writable("medical_record_number", FieldKind::Text, false),
        FieldSpec::writable("name", FieldKind::Text, false),
        FieldSpec::writable("gender", FieldKind::Text, true),
        FieldSpec::writable("birth_date", FieldKind::Date, true),
        FieldSpec::writable("phone", FieldKind::Text, true),
        FieldSpec::writable("address", FieldKind::Text, true),
        FieldSpec::writable("status", FieldKind::Text, false),
        FieldSpec::read_only("created_at", FieldKind::Timestamp, false),
        FieldSpec::read_only("updated_at", FieldKind::Timestamp, false),
        FieldSpec::read_only("deleted_at", FieldKind::Timestamp, true),
    ],
    soft_delete_column: Some("deleted_at"),
};
