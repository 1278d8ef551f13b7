use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::DomainError;
use crate::services::BulkOperationService;

/// Poll for pending bulk operations until `shutdown` fires
pub async fn run_worker(
    service: Arc<BulkOperationService>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!("🔄 Bulk operation worker started");

    // Nothing runs yet, so anything still processing belongs to a dead run
    if let Err(e) = service.recover_interrupted().await {
        tracing::error!("❌ Could not fail interrupted bulk operations: {}", e);
    }

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let idle = match process_next(&service).await {
            Ok(processed) => !processed,
            Err(e) => {
                tracing::error!("❌ Error processing bulk operations: {}", e);
                true
            }
        };

        // Go straight to the next operation while there is work
        if idle {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    tracing::info!("Bulk operation worker stopped");
}

/// Execute the oldest pending operation. Returns false when there was none.
async fn process_next(service: &BulkOperationService) -> Result<bool, DomainError> {
    let Some(op) = service.next_pending().await? else {
        return Ok(false);
    };

    match service.execute_operation(op.id).await {
        Ok(done) => {
            tracing::debug!(
                "Bulk operation #{} finished as {} ({}/{} processed, {} failed)",
                done.id,
                done.status,
                done.processed_records,
                done.total_records,
                done.failed_records
            );
            Ok(true)
        }
        // Claimed elsewhere or cancelled before the claim
        Err(DomainError::InvalidState(reason)) => {
            tracing::debug!("Skipping bulk operation #{}: {}", op.id, reason);
            Ok(true)
        }
        Err(e) => Err(e),
    }
}
