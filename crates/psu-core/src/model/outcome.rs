use std::collections::BTreeSet;

use crate::errors::ExError;
use crate::model::record::{RecordKey, TransitionRecord};

/// Result of one atomic insert-if-absent call against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every record was written
    Written,
    /// Nothing was written; these keys violated the precondition
    Rejected { conflicts: Vec<RecordKey> },
}

/// Outcome of committing a whole batch
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    AllCommitted,
    /// Nothing committed; the listed task ids caused the rejection
    ConflictAt(BTreeSet<String>),
    /// The deadline elapsed first; the write may still land later
    TimedOut,
    Failed(ExError),
}

impl BatchOutcome {
    /// Per-record status for a batch that reached a definite store answer.
    ///
    /// Timed-out and failed batches have no per-record status.
    pub fn record_statuses(&self, records: &[TransitionRecord]) -> Option<Vec<PerRecordStatus>> {
        match self {
            BatchOutcome::AllCommitted => {
                Some(vec![PerRecordStatus::Committed; records.len()])
            }
            BatchOutcome::ConflictAt(task_ids) => Some(
                records
                    .iter()
                    .map(|r| {
                        if task_ids.contains(&r.task_id) {
                            PerRecordStatus::Conflicted
                        } else {
                            PerRecordStatus::Provisional
                        }
                    })
                    .collect(),
            ),
            BatchOutcome::TimedOut | BatchOutcome::Failed(_) => None,
        }
    }
}

/// Outward state of a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerRecordStatus {
    /// Not committed, not individually blamed
    Provisional,
    Committed,
    Conflicted,
}

impl PerRecordStatus {
    pub fn http_status(&self) -> u16 {
        match self {
            PerRecordStatus::Provisional => 200,
            PerRecordStatus::Committed => 201,
            PerRecordStatus::Conflicted => 409,
        }
    }
}
