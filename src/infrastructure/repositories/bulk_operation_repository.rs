//! SeaORM implementation of BulkOperationRepository

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};

use crate::domain::{
    BulkOperation, BulkOperationRepository, DomainError, NewBulkOperation, OperationStatus,
    TransitionUpdate,
};
use crate::models::bulk_operation::{ActiveModel, Column, Entity as BulkOperationEntity};

/// SeaORM-based implementation of BulkOperationRepository
pub struct SeaOrmBulkOperationRepository {
    db: DatabaseConnection,
}

impl SeaOrmBulkOperationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

/// Add a chunk's counters to a record that is still `processing`.
///
/// Runs on whatever connection the chunk uses, so the counters commit or roll
/// back with the chunk's row writes. Returns false when the record has left
/// `processing` (cancelled meanwhile); the caller must then roll back.
pub async fn add_progress<C: ConnectionTrait>(
    conn: &C,
    id: i32,
    processed: u64,
    failed: u64,
) -> Result<bool, DbErr> {
    let result = BulkOperationEntity::update_many()
        .col_expr(
            Column::ProcessedRecords,
            Expr::col(Column::ProcessedRecords).add(processed as i64),
        )
        .col_expr(
            Column::FailedRecords,
            Expr::col(Column::FailedRecords).add(failed as i64),
        )
        .col_expr(
            Column::UpdatedAt,
            Expr::value(chrono::Utc::now().to_rfc3339()),
        )
        .filter(Column::Id.eq(id))
        .filter(Column::Status.eq(OperationStatus::Processing.as_str()))
        .exec(conn)
        .await?;

    Ok(result.rows_affected == 1)
}

/// Record the size of the resolved target set on a `processing` record
pub async fn set_total<C: ConnectionTrait>(conn: &C, id: i32, total: u64) -> Result<bool, DbErr> {
    let result = BulkOperationEntity::update_many()
        .col_expr(Column::TotalRecords, Expr::value(total as i64))
        .col_expr(
            Column::UpdatedAt,
            Expr::value(chrono::Utc::now().to_rfc3339()),
        )
        .filter(Column::Id.eq(id))
        .filter(Column::Status.eq(OperationStatus::Processing.as_str()))
        .exec(conn)
        .await?;

    Ok(result.rows_affected == 1)
}

#[async_trait]
impl BulkOperationRepository for SeaOrmBulkOperationRepository {
    async fn insert(&self, input: NewBulkOperation) -> Result<BulkOperation, DomainError> {
        let now = chrono::Utc::now().to_rfc3339();
        let filters = serde_json::to_string(&input.filters)
            .map_err(|e| DomainError::Internal(e.to_string()))?;

        let record = ActiveModel {
            operation_type: Set(input.operation_type.as_str().to_owned()),
            target_model: Set(input.target_model),
            filters: Set(filters),
            payload: Set(input.payload.to_string()),
            status: Set(OperationStatus::Pending.as_str().to_owned()),
            total_records: Set(0),
            processed_records: Set(0),
            failed_records: Set(0),
            error_message: Set(None),
            file_path: Set(None),
            owner_id: Set(input.owner_id),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            started_at: Set(None),
            completed_at: Set(None),
            ..Default::default()
        };

        let result = record.insert(&self.db).await?;
        BulkOperation::try_from(result)
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<BulkOperation>, DomainError> {
        BulkOperationEntity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(BulkOperation::try_from)
            .transpose()
    }

    async fn find_by_owner(&self, owner_id: i32) -> Result<Vec<BulkOperation>, DomainError> {
        BulkOperationEntity::find()
            .filter(Column::OwnerId.eq(owner_id))
            .order_by_desc(Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(BulkOperation::try_from)
            .collect()
    }

    async fn find_next_pending(&self) -> Result<Option<BulkOperation>, DomainError> {
        BulkOperationEntity::find()
            .filter(Column::Status.eq(OperationStatus::Pending.as_str()))
            .order_by_asc(Column::Id)
            .one(&self.db)
            .await?
            .map(BulkOperation::try_from)
            .transpose()
    }

    async fn transition(
        &self,
        id: i32,
        to: OperationStatus,
        update: TransitionUpdate,
    ) -> Result<bool, DomainError> {
        let from: Vec<&str> = to.predecessors().iter().map(|s| s.as_str()).collect();
        if from.is_empty() {
            return Err(DomainError::Internal(format!(
                "no transition leads into '{}'",
                to
            )));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut query = BulkOperationEntity::update_many()
            .col_expr(Column::Status, Expr::value(to.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(now.clone()));

        if to == OperationStatus::Processing {
            query = query.col_expr(Column::StartedAt, Expr::value(now.clone()));
        }
        if to.is_terminal() {
            query = query.col_expr(Column::CompletedAt, Expr::value(now));
        }
        if let Some(message) = update.error_message {
            query = query.col_expr(Column::ErrorMessage, Expr::value(message));
        }
        if let Some(path) = update.file_path {
            query = query.col_expr(Column::FilePath, Expr::value(path));
        }

        let result = query
            .filter(Column::Id.eq(id))
            .filter(Column::Status.is_in(from))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn fail_interrupted(&self, reason: &str) -> Result<Vec<i32>, DomainError> {
        let stale: Vec<i32> = BulkOperationEntity::find()
            .filter(Column::Status.eq(OperationStatus::Processing.as_str()))
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();

        let mut failed = Vec::with_capacity(stale.len());
        for id in stale {
            let update = TransitionUpdate {
                error_message: Some(reason.to_owned()),
                ..Default::default()
            };
            if self.transition(id, OperationStatus::Failed, update).await? {
                failed.push(id);
            }
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FilterOperator, FilterPredicate, OperationType};
    use crate::infrastructure::db::init_db;
    use crate::models::user;
    use serde_json::json;

    async fn setup() -> (DatabaseConnection, i32) {
        let db = init_db("sqlite::memory:").await.expect("Failed to init db");
        let now = chrono::Utc::now().to_rfc3339();
        let owner = user::ActiveModel {
            username: Set("admin".to_owned()),
            role: Set("admin".to_owned()),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&db)
        .await
        .expect("Failed to insert user");
        (db, owner.id)
    }

    fn new_update(owner_id: i32) -> NewBulkOperation {
        NewBulkOperation {
            owner_id,
            operation_type: OperationType::Update,
            target_model: "Procedure".to_owned(),
            filters: vec![FilterPredicate::new(
                "status",
                FilterOperator::Equals,
                json!("pending"),
            )],
            payload: json!({"fields": {"status": "approved"}}),
        }
    }

    #[tokio::test]
    async fn insert_round_trips_through_domain_type() {
        let (db, owner_id) = setup().await;
        let repo = SeaOrmBulkOperationRepository::new(db);

        let created = repo.insert(new_update(owner_id)).await.unwrap();
        assert_eq!(created.status, OperationStatus::Pending);
        assert_eq!(created.total_records, 0);
        assert_eq!(created.filters[0].operator, FilterOperator::Equals);

        let found = repo.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found, created);
        assert!(repo.find_by_id(created.id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_state_is_written_once() {
        let (db, owner_id) = setup().await;
        let repo = SeaOrmBulkOperationRepository::new(db);
        let op = repo.insert(new_update(owner_id)).await.unwrap();

        // Cannot complete straight from pending
        assert!(!repo
            .transition(op.id, OperationStatus::Completed, TransitionUpdate::default())
            .await
            .unwrap());

        assert!(repo
            .transition(op.id, OperationStatus::Processing, TransitionUpdate::default())
            .await
            .unwrap());
        assert!(repo
            .transition(
                op.id,
                OperationStatus::Failed,
                TransitionUpdate {
                    error_message: Some("disk full".to_owned()),
                    ..Default::default()
                }
            )
            .await
            .unwrap());

        // Neither a second terminal write nor a resurrection sticks
        assert!(!repo
            .transition(op.id, OperationStatus::Completed, TransitionUpdate::default())
            .await
            .unwrap());
        assert!(!repo
            .transition(op.id, OperationStatus::Processing, TransitionUpdate::default())
            .await
            .unwrap());

        let stored = repo.find_by_id(op.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OperationStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("disk full"));
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn progress_only_lands_while_processing() {
        let (db, owner_id) = setup().await;
        let repo = SeaOrmBulkOperationRepository::new(db.clone());
        let op = repo.insert(new_update(owner_id)).await.unwrap();

        assert!(!add_progress(&db, op.id, 5, 0).await.unwrap());

        repo.transition(op.id, OperationStatus::Processing, TransitionUpdate::default())
            .await
            .unwrap();
        assert!(set_total(&db, op.id, 10).await.unwrap());
        assert!(add_progress(&db, op.id, 4, 1).await.unwrap());
        assert!(add_progress(&db, op.id, 5, 0).await.unwrap());

        repo.transition(op.id, OperationStatus::Cancelled, TransitionUpdate::default())
            .await
            .unwrap();
        assert!(!add_progress(&db, op.id, 3, 0).await.unwrap());

        let stored = repo.find_by_id(op.id).await.unwrap().unwrap();
        assert_eq!(stored.total_records, 10);
        assert_eq!(stored.processed_records, 9);
        assert_eq!(stored.failed_records, 1);
    }

    #[tokio::test]
    async fn interrupted_runs_are_failed_and_others_left_alone() {
        let (db, owner_id) = setup().await;
        let repo = SeaOrmBulkOperationRepository::new(db);
        let stuck = repo.insert(new_update(owner_id)).await.unwrap();
        let queued = repo.insert(new_update(owner_id)).await.unwrap();
        repo.transition(stuck.id, OperationStatus::Processing, TransitionUpdate::default())
            .await
            .unwrap();

        let failed = repo.fail_interrupted("worker restarted").await.unwrap();
        assert_eq!(failed, vec![stuck.id]);

        let stuck = repo.find_by_id(stuck.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, OperationStatus::Failed);
        assert_eq!(stuck.error_message.as_deref(), Some("worker restarted"));
        assert!(stuck.completed_at.is_some());

        let queued = repo.find_by_id(queued.id).await.unwrap().unwrap();
        assert_eq!(queued.status, OperationStatus::Pending);
        assert!(repo.fail_interrupted("again").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_owner_operations_newest_first() {
        let (db, owner_id) = setup().await;
        let repo = SeaOrmBulkOperationRepository::new(db);
        let first = repo.insert(new_update(owner_id)).await.unwrap();
        let second = repo.insert(new_update(owner_id)).await.unwrap();

        let listed = repo.find_by_owner(owner_id).await.unwrap();
        let ids: Vec<i32> = listed.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        let next = repo.find_next_pending().await.unwrap().unwrap();
        assert_eq!(next.id, first.id);
        assert!(repo.find_by_owner(owner_id + 100).await.unwrap().is_empty());
    }
}
