//! Target models a bulk operation can act on
//!
//! A `BulkTarget` turns compiled predicates and assignments into SeaORM
//! statements for one entity. `SeaOrmTarget` does this generically for any
//! entity with an integer `id` column, guided by the entity's `TargetSchema`.

use async_trait::async_trait;
use sea_orm::sea_query::{Expr, Query, SimpleExpr};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, IdenStatic, Iterable, QueryFilter, QueryOrder, QuerySelect,
};
use serde_json::Value as JsonValue;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::domain::{
    Assignment, CompiledPredicate, FieldKind, FieldValue, FilterOperator, Operand, TargetSchema,
};
use crate::models::{patient, procedure};

#[async_trait]
pub trait BulkTarget: Send + Sync {
    fn schema(&self) -> &'static TargetSchema;

    /// IDs of the live rows matching every predicate, ascending
    async fn resolve_ids(
        &self,
        db: &DatabaseConnection,
        filters: &[CompiledPredicate],
    ) -> Result<Vec<i32>, DbErr>;

    /// Selected columns of the given rows as JSON objects, ascending by id
    async fn fetch_rows(
        &self,
        db: &DatabaseConnection,
        ids: &[i32],
        columns: &[&'static str],
    ) -> Result<Vec<JsonValue>, DbErr>;

    async fn insert_row(
        &self,
        txn: &DatabaseTransaction,
        values: &[Assignment],
    ) -> Result<(), DbErr>;

    /// Returns false when the row no longer exists
    async fn update_row(
        &self,
        txn: &DatabaseTransaction,
        id: i32,
        values: &[Assignment],
    ) -> Result<bool, DbErr>;

    /// Soft-deletes when the schema allows it. Returns false when the row no
    /// longer exists (or is already soft-deleted).
    async fn delete_row(&self, txn: &DatabaseTransaction, id: i32) -> Result<bool, DbErr>;
}

/// Convert a coerced field value into a database value
pub fn db_value(value: &FieldValue) -> sea_orm::Value {
    match value {
        FieldValue::Null(FieldKind::Integer) => sea_orm::Value::BigInt(None),
        FieldValue::Null(FieldKind::Real) => sea_orm::Value::Double(None),
        FieldValue::Null(FieldKind::Boolean) => sea_orm::Value::Bool(None),
        FieldValue::Null(_) => sea_orm::Value::String(None),
        FieldValue::Integer(i) => (*i).into(),
        FieldValue::Real(f) => (*f).into(),
        FieldValue::Text(s) => s.clone().into(),
        FieldValue::Boolean(b) => (*b).into(),
    }
}

pub struct SeaOrmTarget<E> {
    schema: &'static TargetSchema,
    _entity: PhantomData<fn() -> E>,
}

impl<E: EntityTrait + 'static> SeaOrmTarget<E> {
    pub fn new(schema: &'static TargetSchema) -> Self {
        Self {
            schema,
            _entity: PhantomData,
        }
    }

    fn column(&self, name: &str) -> Result<E::Column, DbErr> {
        E::Column::iter()
            .find(|c| c.as_str() == name)
            .ok_or_else(|| {
                DbErr::Custom(format!("{} has no column '{}'", self.schema.table, name))
            })
    }

    fn id_column(&self) -> Result<E::Column, DbErr> {
        self.column("id")
    }

    /// Rows hidden by a soft delete never take part in bulk work
    fn live_rows(&self) -> Result<Condition, DbErr> {
        let mut cond = Condition::all();
        if let Some(deleted_at) = self.schema.soft_delete_column {
            cond = cond.add(self.column(deleted_at)?.is_null());
        }
        Ok(cond)
    }

    fn predicate_expr(&self, pred: &CompiledPredicate) -> Result<SimpleExpr, DbErr> {
        let col = self.column(pred.field)?;
        let expr = match (pred.operator, &pred.operand) {
            (FilterOperator::Equals, Operand::Scalar(v)) => col.eq(db_value(v)),
            (FilterOperator::NotEquals, Operand::Scalar(v)) => col.ne(db_value(v)),
            (FilterOperator::GreaterThan, Operand::Scalar(v)) => col.gt(db_value(v)),
            (FilterOperator::GreaterOrEqual, Operand::Scalar(v)) => col.gte(db_value(v)),
            (FilterOperator::LessThan, Operand::Scalar(v)) => col.lt(db_value(v)),
            (FilterOperator::LessOrEqual, Operand::Scalar(v)) => col.lte(db_value(v)),
            (FilterOperator::Like, Operand::Pattern(p)) => col.like(p.as_str()),
            (FilterOperator::NotLike, Operand::Pattern(p)) => col.not_like(p.as_str()),
            (FilterOperator::In, Operand::List(vs)) => col.is_in(vs.iter().map(db_value)),
            (FilterOperator::NotIn, Operand::List(vs)) => col.is_not_in(vs.iter().map(db_value)),
            (FilterOperator::IsNull, _) => col.is_null(),
            (FilterOperator::IsNotNull, _) => col.is_not_null(),
            (op, operand) => {
                return Err(DbErr::Custom(format!(
                    "operator {:?} cannot take {:?}",
                    op, operand
                )));
            }
        };
        Ok(expr)
    }

    fn condition(&self, filters: &[CompiledPredicate]) -> Result<Condition, DbErr> {
        filters
            .iter()
            .try_fold(self.live_rows()?, |cond, pred| -> Result<Condition, DbErr> {
                Ok(cond.add(self.predicate_expr(pred)?))
            })
    }

    fn stamp(&self, name: &str) -> Result<Option<E::Column>, DbErr> {
        if self.schema.has_field(name) {
            self.column(name).map(Some)
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl<E> BulkTarget for SeaOrmTarget<E>
where
    E: EntityTrait + 'static,
{
    fn schema(&self) -> &'static TargetSchema {
        self.schema
    }

    async fn resolve_ids(
        &self,
        db: &DatabaseConnection,
        filters: &[CompiledPredicate],
    ) -> Result<Vec<i32>, DbErr> {
        let id = self.id_column()?;
        E::find()
            .select_only()
            .column(id)
            .filter(self.condition(filters)?)
            .order_by_asc(id)
            .into_tuple::<i32>()
            .all(db)
            .await
    }

    async fn fetch_rows(
        &self,
        db: &DatabaseConnection,
        ids: &[i32],
        columns: &[&'static str],
    ) -> Result<Vec<JsonValue>, DbErr> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let id = self.id_column()?;
        let mut select = E::find().select_only();
        for name in columns {
            select = select.column(self.column(name)?);
        }

        select
            .filter(id.is_in(ids.iter().copied()))
            .order_by_asc(id)
            .into_json()
            .all(db)
            .await
    }

    async fn insert_row(
        &self,
        txn: &DatabaseTransaction,
        values: &[Assignment],
    ) -> Result<(), DbErr> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut columns = Vec::with_capacity(values.len() + 2);
        let mut exprs: Vec<SimpleExpr> = Vec::with_capacity(values.len() + 2);

        for assignment in values {
            columns.push(self.column(assignment.field)?);
            exprs.push(db_value(&assignment.value).into());
        }
        for stamp in ["created_at", "updated_at"] {
            if let Some(col) = self.stamp(stamp)? {
                columns.push(col);
                exprs.push(now.clone().into());
            }
        }

        let mut stmt = Query::insert();
        stmt.into_table(E::default())
            .columns(columns)
            .values(exprs)
            .map_err(|e| DbErr::Custom(e.to_string()))?;

        txn.execute(txn.get_database_backend().build(&stmt)).await?;
        Ok(())
    }

    async fn update_row(
        &self,
        txn: &DatabaseTransaction,
        id: i32,
        values: &[Assignment],
    ) -> Result<bool, DbErr> {
        let mut update = E::update_many();
        for assignment in values {
            update = update.col_expr(
                self.column(assignment.field)?,
                Expr::value(db_value(&assignment.value)),
            );
        }
        if let Some(updated_at) = self.stamp("updated_at")? {
            update = update.col_expr(updated_at, Expr::value(chrono::Utc::now().to_rfc3339()));
        }

        let result = update
            .filter(self.live_rows()?.add(self.id_column()?.eq(id)))
            .exec(txn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn delete_row(&self, txn: &DatabaseTransaction, id: i32) -> Result<bool, DbErr> {
        let rows_affected = match self.schema.soft_delete_column {
            Some(deleted_at) => {
                let now = chrono::Utc::now().to_rfc3339();
                let mut update =
                    E::update_many().col_expr(self.column(deleted_at)?, Expr::value(now.clone()));
                if let Some(updated_at) = self.stamp("updated_at")? {
                    update = update.col_expr(updated_at, Expr::value(now));
                }
                update
                    .filter(self.live_rows()?.add(self.id_column()?.eq(id)))
                    .exec(txn)
                    .await?
                    .rows_affected
            }
            None => {
                E::delete_many()
                    .filter(self.id_column()?.eq(id))
                    .exec(txn)
                    .await?
                    .rows_affected
            }
        };

        Ok(rows_affected == 1)
    }
}

/// Lookup of target models by name
#[derive(Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<Arc<dyn BulkTarget>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patients and procedures
    pub fn clinic() -> Self {
        Self::new()
            .register(Arc::new(SeaOrmTarget::<patient::Entity>::new(&patient::SCHEMA)))
            .register(Arc::new(SeaOrmTarget::<procedure::Entity>::new(&procedure::SCHEMA)))
    }

    pub fn register(mut self, target: Arc<dyn BulkTarget>) -> Self {
        let name = target.schema().name;
        self.targets.retain(|t| t.schema().name != name);
        self.targets.push(target);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BulkTarget>> {
        self.targets
            .iter()
            .find(|t| t.schema().answers_to(name))
            .cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.targets.iter().map(|t| t.schema().name).collect()
    }
}
