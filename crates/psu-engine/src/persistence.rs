//! Persistence engine
//!
//! Commits a batch through the store's atomic insert-if-absent under the
//! deadline guard and folds the result into a single [`BatchOutcome`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use psu_core::model::{BatchOutcome, TransitionRecord, WriteOutcome};
use psu_core::ports::TransitionStore;
use psu_core::{log_op_end, log_op_error, log_op_start};
use psu_core_types::RequestId;

use crate::deadline::{with_deadline, Deadline};

/// Commit every record or none of them
pub async fn commit(
    store: Arc<dyn TransitionStore>,
    records: Vec<TransitionRecord>,
    budget: Duration,
    request_id: &RequestId,
) -> BatchOutcome {
    let start = Instant::now();
    log_op_start!(
        "commit_batch",
        request_id = %request_id,
        batch_len = records.len()
    );

    let write = async move { store.insert_batch_if_absent(records).await };
    let outcome = match with_deadline(budget, write).await {
        Ok(Deadline::Completed(Ok(WriteOutcome::Written))) => BatchOutcome::AllCommitted,
        Ok(Deadline::Completed(Ok(WriteOutcome::Rejected { conflicts }))) => {
            let task_ids: BTreeSet<String> = conflicts.into_iter().map(|k| k.task_id).collect();
            tracing::info!(
                request_id = %request_id,
                conflicts = ?task_ids,
                "Batch rejected: records already exist"
            );
            BatchOutcome::ConflictAt(task_ids)
        }
        Ok(Deadline::Completed(Err(err))) | Err(err) => {
            let err = err.with_request_id(request_id.clone());
            log_op_error!(
                "commit_batch",
                err,
                duration_ms = start.elapsed().as_millis() as u64,
                request_id = %request_id
            );
            return BatchOutcome::Failed(err);
        }
        Ok(Deadline::TimedOut) => {
            tracing::error!(
                request_id = %request_id,
                budget_ms = budget.as_millis() as u64,
                "Store write timed out; it may still complete"
            );
            BatchOutcome::TimedOut
        }
    };

    log_op_end!(
        "commit_batch",
        duration_ms = start.elapsed().as_millis() as u64,
        request_id = %request_id
    );
    outcome
}
