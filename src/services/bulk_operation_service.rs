//! Bulk Operation Service - lifecycle of bulk create/update/delete/export jobs
//!
//! An operation is created `pending`, claimed into `processing` by whoever
//! executes it, and left in exactly one terminal state. Row writes happen in
//! chunks: one transaction per chunk, one savepoint per row, and the chunk's
//! counters are added to the record inside the same transaction.

use dashmap::DashMap;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    Assignment, BulkOperation, BulkOperationRepository, CompiledPredicate, DomainError,
    ExportPayload, ExportStorage, FilterPredicate, NewBulkOperation, OperationPayload, OperationStatus,
    OperationType, TransitionUpdate, UserRepository,
};
use crate::infrastructure::repositories::bulk_operation_repository::{add_progress, set_total};
use crate::infrastructure::{SeaOrmBulkOperationRepository, SeaOrmUserRepository};
use crate::services::export_format::ExportWriter;
use crate::services::targets::{BulkTarget, TargetRegistry};

/// Input for `create_operation`
#[derive(Debug, Clone)]
pub struct CreateOperation {
    pub owner_id: i32,
    pub operation_type: OperationType,
    pub target_model: String,
    pub payload: Value,
    pub filters: Vec<FilterPredicate>,
}

/// A finished export, ready to be served
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub file_name: String,
    pub content_type: &'static str,
    pub contents: Vec<u8>,
}

enum RunOutcome {
    Finished { file_path: Option<String> },
    Cancelled,
}

/// One row of work inside a chunk
enum RowWrite<'a> {
    Insert(&'a Map<String, Value>),
    Update(i32, &'a [Assignment]),
    Delete(i32),
}

enum RowFailure {
    /// The row could not be written; counted and skipped
    Rejected(String),
    /// The database itself is gone; the whole operation fails
    Fatal(DbErr),
}

impl From<DbErr> for RowFailure {
    fn from(e: DbErr) -> Self {
        match e {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => RowFailure::Fatal(e),
            other => RowFailure::Rejected(other.to_string()),
        }
    }
}

pub struct BulkOperationService {
    db: DatabaseConnection,
    operations: Arc<dyn BulkOperationRepository>,
    users: Arc<dyn UserRepository>,
    storage: Arc<dyn ExportStorage>,
    targets: TargetRegistry,
    chunk_size: usize,
    /// Cancellation tokens of the runs executing in this process
    runs: DashMap<i32, CancellationToken>,
}

impl BulkOperationService {
    pub fn new(db: DatabaseConnection, storage: Arc<dyn ExportStorage>, chunk_size: u64) -> Self {
        Self {
            operations: Arc::new(SeaOrmBulkOperationRepository::new(db.clone())),
            users: Arc::new(SeaOrmUserRepository::new(db.clone())),
            db,
            storage,
            targets: TargetRegistry::clinic(),
            chunk_size: chunk_size.max(1) as usize,
            runs: DashMap::new(),
        }
    }

    pub fn with_targets(mut self, targets: TargetRegistry) -> Self {
        self.targets = targets;
        self
    }

    fn target(&self, name: &str) -> Result<Arc<dyn BulkTarget>, DomainError> {
        self.targets.get(name).ok_or_else(|| {
            DomainError::Validation(format!(
                "unknown target model '{}' (known: {})",
                name,
                self.targets.names().join(", ")
            ))
        })
    }

    /// Validate and persist a new `pending` operation
    pub async fn create_operation(
        &self,
        request: CreateOperation,
    ) -> Result<BulkOperation, DomainError> {
        match request.operation_type {
            OperationType::Delete if request.filters.is_empty() => {
                return Err(DomainError::Validation(
                    "delete operations require at least one filter".to_string(),
                ));
            }
            OperationType::Create if !request.filters.is_empty() => {
                return Err(DomainError::Validation(
                    "create operations do not take filters".to_string(),
                ));
            }
            _ => {}
        }

        let target = self.target(&request.target_model)?;
        let schema = target.schema();
        schema.compile_filters(&request.filters)?;
        let payload = OperationPayload::parse(request.operation_type, &request.payload)?;
        schema.validate_payload(&payload)?;

        if !self.users.exists(request.owner_id).await? {
            return Err(DomainError::Validation(format!(
                "unknown owner {}",
                request.owner_id
            )));
        }

        let op = self
            .operations
            .insert(NewBulkOperation {
                owner_id: request.owner_id,
                operation_type: request.operation_type,
                target_model: schema.name.to_owned(),
                filters: request.filters,
                payload: payload.to_value(),
            })
            .await?;

        tracing::info!(
            "📝 Bulk operation #{} created: {} on {} by user {}",
            op.id,
            op.operation_type,
            op.target_model,
            op.owner_id
        );
        Ok(op)
    }

    pub async fn get_operation(&self, id: i32) -> Result<BulkOperation, DomainError> {
        self.operations
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("bulk operation {}", id)))
    }

    pub async fn list_operations(&self, owner_id: i32) -> Result<Vec<BulkOperation>, DomainError> {
        self.operations.find_by_owner(owner_id).await
    }

    pub async fn next_pending(&self) -> Result<Option<BulkOperation>, DomainError> {
        self.operations.find_next_pending().await
    }

    /// Fail records left in `processing` by a process that died mid-run.
    /// Only safe before this process starts executing operations.
    pub async fn recover_interrupted(&self) -> Result<Vec<i32>, DomainError> {
        let failed = self
            .operations
            .fail_interrupted("interrupted: the process running this operation stopped")
            .await?;
        for id in &failed {
            tracing::warn!("⚠️ Bulk operation #{} was left processing, marked failed", id);
        }
        Ok(failed)
    }

    /// Run a pending operation to a terminal state.
    ///
    /// Failures during the run are recorded on the operation (status
    /// `failed`) and the final record is returned; only precondition
    /// violations and lookup errors come back as `Err`.
    pub async fn execute_operation(&self, id: i32) -> Result<BulkOperation, DomainError> {
        let op = self.get_operation(id).await?;
        self.run(op).await
    }

    pub async fn execute_bulk_update(&self, id: i32) -> Result<BulkOperation, DomainError> {
        self.execute_as(id, OperationType::Update).await
    }

    pub async fn execute_bulk_delete(&self, id: i32) -> Result<BulkOperation, DomainError> {
        self.execute_as(id, OperationType::Delete).await
    }

    pub async fn execute_bulk_export(&self, id: i32) -> Result<BulkOperation, DomainError> {
        self.execute_as(id, OperationType::Export).await
    }

    pub async fn execute_bulk_create(&self, id: i32) -> Result<BulkOperation, DomainError> {
        self.execute_as(id, OperationType::Create).await
    }

    async fn execute_as(
        &self,
        id: i32,
        expected: OperationType,
    ) -> Result<BulkOperation, DomainError> {
        let op = self.get_operation(id).await?;
        if op.operation_type != expected {
            return Err(DomainError::InvalidState(format!(
                "operation {} is a {} operation, not {}",
                id, op.operation_type, expected
            )));
        }
        self.run(op).await
    }

    async fn run(&self, op: BulkOperation) -> Result<BulkOperation, DomainError> {
        if op.status != OperationStatus::Pending {
            return Err(DomainError::InvalidState(format!(
                "operation {} is {}, only pending operations can be executed",
                op.id, op.status
            )));
        }

        // Registered before the claim so a cancel landing right after it still trips the run
        let token = CancellationToken::new();
        self.runs.insert(op.id, token.clone());

        let claimed = self
            .operations
            .transition(op.id, OperationStatus::Processing, TransitionUpdate::default())
            .await;
        match claimed {
            Ok(true) => {}
            Ok(false) => {
                self.runs.remove(&op.id);
                return Err(DomainError::InvalidState(format!(
                    "operation {} is no longer pending",
                    op.id
                )));
            }
            Err(e) => {
                self.runs.remove(&op.id);
                return Err(e);
            }
        }

        tracing::info!(
            "⚙️ Processing bulk operation #{}: {} on {}",
            op.id,
            op.operation_type,
            op.target_model
        );

        let outcome = self.drive(&op, &token).await;
        self.runs.remove(&op.id);

        match outcome {
            Ok(RunOutcome::Finished { file_path }) => {
                let completed = self
                    .operations
                    .transition(
                        op.id,
                        OperationStatus::Completed,
                        TransitionUpdate {
                            file_path: file_path.clone(),
                            ..Default::default()
                        },
                    )
                    .await?;
                if completed {
                    tracing::info!("✅ Bulk operation #{} completed", op.id);
                } else {
                    tracing::warn!(
                        "Bulk operation #{} left processing before it could complete",
                        op.id
                    );
                    // Never downloadable, so don't keep it
                    if let Some(location) = file_path {
                        if let Err(e) = self.storage.remove(&location).await {
                            tracing::warn!(
                                "Could not remove export {} of operation #{}: {}",
                                location,
                                op.id,
                                e
                            );
                        }
                    }
                }
            }
            Ok(RunOutcome::Cancelled) => {
                tracing::info!("🛑 Bulk operation #{} stopped after cancellation", op.id);
            }
            Err(e) => {
                tracing::error!("❌ Bulk operation #{} failed: {}", op.id, e);
                let recorded = self
                    .operations
                    .transition(
                        op.id,
                        OperationStatus::Failed,
                        TransitionUpdate {
                            error_message: Some(e.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                if let Err(lost) = recorded {
                    // Stays processing until the next worker start fails it
                    tracing::error!(
                        "❌ Bulk operation #{} could not be marked failed: {}",
                        op.id,
                        lost
                    );
                    return Err(lost);
                }
            }
        }

        self.get_operation(op.id).await
    }

    /// Do the work of a claimed operation. Any error is operation-level.
    async fn drive(
        &self,
        op: &BulkOperation,
        token: &CancellationToken,
    ) -> Result<RunOutcome, DomainError> {
        let target = self.target(&op.target_model)?;
        let schema = target.schema();
        let filters = schema.compile_filters(&op.filters)?;

        match OperationPayload::parse(op.operation_type, &op.payload)? {
            OperationPayload::Update(update) => {
                let assignments = schema.compile_assignments(&update.fields)?;
                let ids = target.resolve_ids(&self.db, &filters).await?;
                let rows: Vec<RowWrite> = ids
                    .iter()
                    .map(|id| RowWrite::Update(*id, &assignments))
                    .collect();
                self.write_all(op.id, target.as_ref(), token, &rows).await
            }
            OperationPayload::Delete => {
                let ids = target.resolve_ids(&self.db, &filters).await?;
                let rows: Vec<RowWrite> = ids.iter().map(|id| RowWrite::Delete(*id)).collect();
                self.write_all(op.id, target.as_ref(), token, &rows).await
            }
            OperationPayload::Create(create) => {
                let rows: Vec<RowWrite> = create.records.iter().map(RowWrite::Insert).collect();
                self.write_all(op.id, target.as_ref(), token, &rows).await
            }
            OperationPayload::Export(export) => {
                self.export(op, target.as_ref(), token, &filters, &export)
                    .await
            }
        }
    }

    async fn write_all(
        &self,
        op_id: i32,
        target: &dyn BulkTarget,
        token: &CancellationToken,
        rows: &[RowWrite<'_>],
    ) -> Result<RunOutcome, DomainError> {
        if !set_total(&self.db, op_id, rows.len() as u64).await? {
            return Ok(RunOutcome::Cancelled);
        }
        tracing::debug!("Bulk operation #{}: {} rows to write", op_id, rows.len());

        for chunk in rows.chunks(self.chunk_size) {
            if token.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            if !self.write_chunk(op_id, target, chunk).await? {
                return Ok(RunOutcome::Cancelled);
            }
        }

        Ok(RunOutcome::Finished { file_path: None })
    }

    /// Write one chunk in its own transaction. Returns false when the
    /// operation was cancelled meanwhile; the chunk is then rolled back.
    async fn write_chunk(
        &self,
        op_id: i32,
        target: &dyn BulkTarget,
        rows: &[RowWrite<'_>],
    ) -> Result<bool, DomainError> {
        let txn = self.db.begin().await?;
        let mut processed = 0u64;
        let mut failed = 0u64;

        for row in rows {
            let savepoint = txn.begin().await?;
            match apply_row(target, &savepoint, row).await {
                Ok(()) => {
                    savepoint.commit().await?;
                    processed += 1;
                }
                Err(RowFailure::Rejected(reason)) => {
                    savepoint.rollback().await?;
                    failed += 1;
                    tracing::warn!("Bulk operation #{}: row skipped: {}", op_id, reason);
                }
                Err(RowFailure::Fatal(e)) => {
                    savepoint.rollback().await.ok();
                    txn.rollback().await.ok();
                    return Err(e.into());
                }
            }
        }

        if !add_progress(&txn, op_id, processed, failed).await? {
            txn.rollback().await?;
            return Ok(false);
        }
        txn.commit().await?;

        tracing::debug!(
            "Bulk operation #{}: chunk committed ({} ok, {} failed)",
            op_id,
            processed,
            failed
        );
        Ok(true)
    }

    async fn export(
        &self,
        op: &BulkOperation,
        target: &dyn BulkTarget,
        token: &CancellationToken,
        filters: &[CompiledPredicate],
        export: &ExportPayload,
    ) -> Result<RunOutcome, DomainError> {
        let schema = target.schema();
        let columns: Vec<&'static str> = match &export.columns {
            Some(columns) => columns
                .iter()
                .map(|c| {
                    schema.field(c).map(|f| f.name).ok_or_else(|| {
                        DomainError::Validation(format!("unknown export column '{}'", c))
                    })
                })
                .collect::<Result<_, _>>()?,
            None => schema.exportable_columns(),
        };

        let ids = target.resolve_ids(&self.db, filters).await?;
        if !set_total(&self.db, op.id, ids.len() as u64).await? {
            return Ok(RunOutcome::Cancelled);
        }

        let mut writer = ExportWriter::new(export.format, &columns)?;
        for chunk in ids.chunks(self.chunk_size) {
            if token.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }

            let rows = target.fetch_rows(&self.db, chunk, &columns).await?;
            for row in &rows {
                writer.write_row(row)?;
            }

            // Rows deleted between resolution and fetch are missing from `rows`
            let processed = rows.len() as u64;
            let failed = chunk.len() as u64 - processed.min(chunk.len() as u64);
            if !add_progress(&self.db, op.id, processed, failed).await? {
                return Ok(RunOutcome::Cancelled);
            }
        }

        let name = format!(
            "{}_{}_{}.{}",
            schema.table,
            op.id,
            uuid::Uuid::new_v4().simple(),
            export.format.extension()
        );
        let location = self.storage.put(&name, writer.finish()?).await?;
        tracing::info!("📦 Export for operation #{} written to {}", op.id, location);

        Ok(RunOutcome::Finished {
            file_path: Some(location),
        })
    }

    /// Request cancellation of a pending or processing operation.
    ///
    /// The record moves to `cancelled` at once; a run in this process stops
    /// before its next chunk and a chunk already in flight is rolled back.
    pub async fn cancel_operation(&self, id: i32) -> Result<BulkOperation, DomainError> {
        let op = self.get_operation(id).await?;
        if !op.status.can_transition_to(OperationStatus::Cancelled) {
            return Err(DomainError::InvalidState(format!(
                "operation {} is already {}",
                id, op.status
            )));
        }

        if !self
            .operations
            .transition(id, OperationStatus::Cancelled, TransitionUpdate::default())
            .await?
        {
            let current = self.get_operation(id).await?;
            return Err(DomainError::InvalidState(format!(
                "operation {} is already {}",
                id, current.status
            )));
        }

        if let Some(token) = self.runs.get(&id) {
            token.cancel();
        }

        tracing::info!("🛑 Bulk operation #{} cancelled (was {})", id, op.status);
        self.get_operation(id).await
    }

    /// Artifact of a completed export
    pub async fn download_export(&self, id: i32) -> Result<ExportArtifact, DomainError> {
        let unavailable = || DomainError::NotFound(format!("no export available for operation {}", id));

        let op = self.operations.find_by_id(id).await?.ok_or_else(unavailable)?;
        if op.operation_type != OperationType::Export || op.status != OperationStatus::Completed {
            return Err(unavailable());
        }
        let location = op.file_path.as_deref().ok_or_else(unavailable)?;

        let format = match OperationPayload::parse(OperationType::Export, &op.payload) {
            Ok(OperationPayload::Export(export)) => export.format,
            _ => Default::default(),
        };

        let contents = self.storage.get(location).await?.ok_or_else(unavailable)?;
        let file_name = Path::new(location)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("export_{}.{}", id, format.extension()));

        Ok(ExportArtifact {
            file_name,
            content_type: format.content_type(),
            contents,
        })
    }
}

async fn apply_row(
    target: &dyn BulkTarget,
    txn: &DatabaseTransaction,
    row: &RowWrite<'_>,
) -> Result<(), RowFailure> {
    match row {
        RowWrite::Insert(record) => {
            let values = target
                .schema()
                .compile_assignments(record)
                .map_err(|e| RowFailure::Rejected(e.to_string()))?;
            target.insert_row(txn, &values).await?;
            Ok(())
        }
        RowWrite::Update(id, values) => {
            if target.update_row(txn, *id, values).await? {
                Ok(())
            } else {
                Err(RowFailure::Rejected(format!("row {} no longer exists", id)))
            }
        }
        RowWrite::Delete(id) => {
            if target.delete_row(txn, *id).await? {
                Ok(())
            } else {
                Err(RowFailure::Rejected(format!("row {} no longer exists", id)))
            }
        }
    }
}
