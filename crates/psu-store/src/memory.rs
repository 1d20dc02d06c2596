//! In-memory store and queue adapters
//!
//! Both keep their state behind a `std::sync::Mutex` and expose fault
//! switches, so pipeline tests can drive every failure path without SQLite.
//! The lock is never held across an `.await`.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use psu_core::errors::{ExError, ExErrorKind};
use psu_core::model::{RecordKey, TransitionRecord, WriteOutcome};
use psu_core::ports::{FailedEntry, NotificationQueue, QueueEntry, SendBatchReport, TransitionStore};

use crate::errors::{lock_poisoned, Result};

fn unavailable(op: &str, message: &str) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op(op.to_string())
        .with_message(message.to_string())
}

#[derive(Debug, Default)]
struct StoreFaults {
    writes: Option<String>,
    reads: Option<String>,
    deletes: Option<String>,
    write_delay: Option<Duration>,
}

/// Mutex-guarded map implementing [`TransitionStore`]
#[derive(Debug, Default)]
pub struct MemoryTransitionStore {
    records: Mutex<BTreeMap<RecordKey, TransitionRecord>>,
    faults: Mutex<StoreFaults>,
    deleted: Mutex<Vec<RecordKey>>,
    insert_calls: AtomicUsize,
}

impl MemoryTransitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store records directly, bypassing the insert precondition
    pub fn seed(&self, records: impl IntoIterator<Item = TransitionRecord>) {
        if let Ok(mut stored) = self.records.lock() {
            for record in records {
                stored.insert(record.key(), record);
            }
        }
    }

    /// Fail every insert with a `Persistence` error
    pub fn fail_writes(&self, message: &str) {
        self.with_faults(|f| f.writes = Some(message.to_string()));
    }

    /// Fail every point lookup with a `Persistence` error
    pub fn fail_reads(&self, message: &str) {
        self.with_faults(|f| f.reads = Some(message.to_string()));
    }

    /// Fail every delete with a `Persistence` error
    pub fn fail_deletes(&self, message: &str) {
        self.with_faults(|f| f.deletes = Some(message.to_string()));
    }

    /// Sleep before applying each insert; the insert still lands afterwards
    pub fn delay_writes(&self, delay: Duration) {
        self.with_faults(|f| f.write_delay = Some(delay));
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.records
            .lock()
            .map(|r| r.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every key passed to `delete`, in call order
    pub fn delete_calls(&self) -> Vec<RecordKey> {
        self.deleted.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    fn with_faults(&self, apply: impl FnOnce(&mut StoreFaults)) {
        if let Ok(mut faults) = self.faults.lock() {
            apply(&mut faults);
        }
    }

    fn fault(&self, op: &str, pick: impl FnOnce(&StoreFaults) -> Option<String>) -> Result<()> {
        let faults = self.faults.lock().map_err(|_| lock_poisoned(op))?;
        match pick(&faults) {
            Some(message) => Err(unavailable(op, &message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TransitionStore for MemoryTransitionStore {
    async fn insert_batch_if_absent(&self, records: Vec<TransitionRecord>) -> Result<WriteOutcome> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self
            .faults
            .lock()
            .map_err(|_| lock_poisoned("insert_batch_if_absent"))?
            .write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.fault("insert_batch_if_absent", |f| f.writes.clone())?;

        let mut stored = self
            .records
            .lock()
            .map_err(|_| lock_poisoned("insert_batch_if_absent"))?;

        let mut seen = HashSet::new();
        let mut conflicts = Vec::new();
        for record in &records {
            let key = record.key();
            let violates = stored.contains_key(&key) || !seen.insert(key.clone());
            if violates && !conflicts.contains(&key) {
                conflicts.push(key);
            }
        }

        if !conflicts.is_empty() {
            return Ok(WriteOutcome::Rejected { conflicts });
        }
        for record in records {
            stored.insert(record.key(), record);
        }
        Ok(WriteOutcome::Written)
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<TransitionRecord>> {
        self.fault("get", |f| f.reads.clone())?;
        let stored = self.records.lock().map_err(|_| lock_poisoned("get"))?;
        Ok(stored.get(key).cloned())
    }

    async fn delete(&self, key: &RecordKey) -> Result<bool> {
        self.deleted
            .lock()
            .map_err(|_| lock_poisoned("delete"))?
            .push(key.clone());
        self.fault("delete", |f| f.deletes.clone())?;
        let mut stored = self.records.lock().map_err(|_| lock_poisoned("delete"))?;
        Ok(stored.remove(key).is_some())
    }
}

#[derive(Debug, Default)]
struct QueueFaults {
    reject_from_call: Option<usize>,
    failing_entry_ids: HashSet<String>,
}

/// One recorded `send_batch` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentBatch {
    pub queue_url: String,
    pub entries: Vec<QueueEntry>,
}

/// Recording [`NotificationQueue`] with fault switches
#[derive(Debug, Default)]
pub struct MemoryNotificationQueue {
    calls: Mutex<Vec<SentBatch>>,
    faults: Mutex<QueueFaults>,
}

impl MemoryNotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every call whose zero-based index is `>= index`
    pub fn reject_calls_from(&self, index: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.reject_from_call = Some(index);
        }
    }

    /// Report entries with this id as failed in an otherwise accepted call
    pub fn fail_entry(&self, id: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.failing_entry_ids.insert(id.to_string());
        }
    }

    /// Every call received, including rejected ones
    pub fn calls(&self) -> Vec<SentBatch> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// All entries across calls, in send order
    pub fn sent_entries(&self) -> Vec<QueueEntry> {
        self.calls()
            .into_iter()
            .flat_map(|call| call.entries)
            .collect()
    }
}

#[async_trait]
impl NotificationQueue for MemoryNotificationQueue {
    async fn send_batch(&self, queue_url: &str, entries: Vec<QueueEntry>) -> Result<SendBatchReport> {
        let index = {
            let mut calls = self.calls.lock().map_err(|_| lock_poisoned("send_batch"))?;
            calls.push(SentBatch {
                queue_url: queue_url.to_string(),
                entries: entries.clone(),
            });
            calls.len() - 1
        };

        let faults = self.faults.lock().map_err(|_| lock_poisoned("send_batch"))?;
        if faults.reject_from_call.is_some_and(|from| index >= from) {
            return Err(ExError::new(ExErrorKind::ExternalService)
                .with_op("send_batch")
                .with_message(format!("queue rejected call {}", index)));
        }

        let (failed, successful): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|e| faults.failing_entry_ids.contains(&e.id));
        Ok(SendBatchReport {
            successful: successful.into_iter().map(|e| e.id).collect(),
            failed: failed
                .into_iter()
                .map(|e| FailedEntry {
                    id: e.id,
                    code: "InternalError".to_string(),
                    message: "simulated entry failure".to_string(),
                })
                .collect(),
        })
    }
}
