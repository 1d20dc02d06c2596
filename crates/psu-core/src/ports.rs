//! Interfaces to the externally owned collaborators
//!
//! The pipeline only ever talks to the store, the queue and the
//! parameter/secret sources through these traits. Adapters live in
//! `psu-store` (store, queue) and [`crate::sources`] (parameters, secrets).

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::Result;
use crate::model::{RecordKey, TransitionRecord, WriteOutcome};

/// Durable record store with insert-if-absent semantics
#[async_trait]
pub trait TransitionStore: Send + Sync {
    /// Insert every record as one atomic unit.
    ///
    /// Each record carries the precondition "no record with this key
    /// exists". If any precondition fails nothing is written and every
    /// violating key is reported.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` when the store cannot be reached. A
    /// precondition failure is `Ok(WriteOutcome::Rejected)`, not an error.
    async fn insert_batch_if_absent(&self, records: Vec<TransitionRecord>) -> Result<WriteOutcome>;

    /// Point lookup by composite key.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` when the store cannot be reached.
    async fn get(&self, key: &RecordKey) -> Result<Option<TransitionRecord>>;

    /// Delete by composite key; `Ok(false)` if nothing was stored.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` when the store cannot be reached.
    async fn delete(&self, key: &RecordKey) -> Result<bool>;
}

/// One message in a batched queue send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Unique within its send call
    pub id: String,
    pub body: String,
    /// Ordering scope at the queue
    pub group_id: String,
    /// Duplicate-suppression key at the queue
    pub dedup_id: String,
}

/// An entry the queue refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub id: String,
    pub code: String,
    pub message: String,
}

/// Per-entry report of a batched send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendBatchReport {
    pub successful: Vec<String>,
    pub failed: Vec<FailedEntry>,
}

/// Hard limit on entries per `send_batch` call
pub const MAX_QUEUE_BATCH: usize = 10;

/// Downstream FIFO-style notification queue
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Send up to [`MAX_QUEUE_BATCH`] entries in one call.
    ///
    /// # Errors
    ///
    /// Returns `ExternalService` when the call as a whole is rejected.
    async fn send_batch(&self, queue_url: &str, entries: Vec<QueueEntry>) -> Result<SendBatchReport>;
}

/// Externally owned key/value configuration
#[async_trait]
pub trait ParameterSource: Send + Sync {
    /// Fetch several parameters in one call. Names that do not exist are
    /// simply absent from the returned map.
    ///
    /// # Errors
    ///
    /// Returns `ExternalService` when the source cannot be reached.
    async fn get_parameters(&self, names: &[String]) -> Result<HashMap<String, String>>;
}

/// Externally owned secret store
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Fetch a secret's JSON value; `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `ExternalService` when the source cannot be reached.
    async fn get_secret(&self, name: &str) -> Result<Option<serde_json::Value>>;
}
