//! Medical procedure ("tindakan") performed on a patient

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{FieldKind, FieldSpec, TargetSchema};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "procedures")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub patient_id: i32,
    pub procedure_code: String,
    pub name: String,
    pub performed_at: Option<String>,
    pub tariff: f64,
    #[sea_orm(default_value = "pending")]
    pub status: String, // pending, approved, rejected, billed
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::patient::Entity",
        from = "Column::PatientId",
        to = "super::patient::Column::Id",
        on_delete = "Cascade"
    )]
    Patient,
}

impl Related<super::patient::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Patient.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

pub const SCHEMA: TargetSchema = TargetSchema {
    name: "Procedure",
    table: "procedures",
    fields: &[
        FieldSpec::read_only("id", FieldKind::Integer, false),
        FieldSpec::writable("patient_id", FieldKind::Integer, false),
        FieldSpec::writable("procedure_code", FieldKind::Text, false),
        FieldSpec::writable("name", FieldKind::Text, false),
        FieldSpec::writable("performed_at", FieldKind::Timestamp, true),
        FieldSpec::writable("tariff", FieldKind::Real, false),
        FieldSpec::writable("status", FieldKind::Text, false),
        FieldSpec::writable("notes", FieldKind::Text, true),
        FieldSpec::read_only("created_at", FieldKind::Timestamp, false),
        FieldSpec::read_only("updated_at", FieldKind::Timestamp, false),
    ],
    soft_delete_column: None,
};
