//! SQLite transition store
//!
//! Implements [`TransitionStore`] over a shared rusqlite connection. Every
//! async method hands a `_sync` twin to `spawn_blocking` so the lock is never
//! held across an `.await`.
//!
//! Rows whose `expiry_time` has passed count as absent: lookups skip them and
//! an insert purges an expired row under the same key before writing.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use psu_core::clock::{Clock, SystemClock};
use psu_core::model::{RecordKey, TransitionRecord, WriteOutcome};
use psu_core::ports::TransitionStore;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::SharedConnection;
use crate::errors::{from_rusqlite, join_error, lock_poisoned, Result};

const INSERT_IF_ABSENT: &str = "INSERT INTO transition_records (
        task_id, prescription_id, line_item_id, patient_id, site_code,
        application_name, request_id, status, terminal_status,
        last_modified, repeat_no, expiry_time)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
     ON CONFLICT(task_id, prescription_id) DO NOTHING";

const SELECT_BY_KEY: &str = "SELECT task_id, prescription_id, line_item_id, patient_id, site_code,
        application_name, request_id, status, terminal_status,
        last_modified, repeat_no, expiry_time
     FROM transition_records
     WHERE task_id = ?1 AND prescription_id = ?2 AND expiry_time > ?3";

const PURGE_EXPIRED: &str = "DELETE FROM transition_records
     WHERE task_id = ?1 AND prescription_id = ?2 AND expiry_time <= ?3";

/// Decode a `transition_records` row; `last_modified` is stored as RFC3339 text
fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TransitionRecord> {
    let last_modified: String = row.get(9)?;
    let last_modified = DateTime::parse_from_rfc3339(&last_modified)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    Ok(TransitionRecord {
        task_id: row.get(0)?,
        prescription_id: row.get(1)?,
        line_item_id: row.get(2)?,
        patient_id: row.get(3)?,
        site_code: row.get(4)?,
        application_name: row.get(5)?,
        request_id: row.get(6)?,
        status: row.get(7)?,
        terminal_status: row.get(8)?,
        last_modified,
        repeat_number: row.get(10)?,
        expiry_time: row.get(11)?,
    })
}

/// Durable store backed by the `transition_records` table
#[derive(Clone)]
pub struct SqliteTransitionStore {
    conn: SharedConnection,
    clock: Arc<dyn Clock>,
}

impl SqliteTransitionStore {
    /// Wrap an already migrated connection
    pub fn new(conn: SharedConnection) -> Self {
        Self {
            conn,
            clock: Arc::new(SystemClock),
        }
    }

    /// Judge record expiry against this clock instead of the system clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Insert every record in one transaction, or none of them.
    ///
    /// A key that already exists, or that repeats inside `records`, leaves
    /// the insert untouched (`changes() == 0`); the transaction is then
    /// rolled back and each such key is reported once.
    pub fn insert_batch_if_absent_sync(&self, records: &[TransitionRecord]) -> Result<WriteOutcome> {
        let now = self.clock.now().timestamp();
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| lock_poisoned("insert_batch_if_absent"))?;
        let tx = conn.transaction().map_err(from_rusqlite)?;

        let mut conflicts: Vec<RecordKey> = Vec::new();
        {
            let mut purge = tx.prepare_cached(PURGE_EXPIRED).map_err(from_rusqlite)?;
            let mut stmt = tx.prepare_cached(INSERT_IF_ABSENT).map_err(from_rusqlite)?;
            for record in records {
                purge
                    .execute(params![record.task_id, record.prescription_id, now])
                    .map_err(from_rusqlite)?;
                let changed = stmt
                    .execute(params![
                        record.task_id,
                        record.prescription_id,
                        record.line_item_id,
                        record.patient_id,
                        record.site_code,
                        record.application_name,
                        record.request_id,
                        record.status,
                        record.terminal_status,
                        record.last_modified.to_rfc3339(),
                        record.repeat_number,
                        record.expiry_time,
                    ])
                    .map_err(from_rusqlite)?;

                let key = record.key();
                if changed == 0 && !conflicts.contains(&key) {
                    conflicts.push(key);
                }
            }
        }

        if conflicts.is_empty() {
            tx.commit().map_err(from_rusqlite)?;
            Ok(WriteOutcome::Written)
        } else {
            tx.rollback().map_err(from_rusqlite)?;
            Ok(WriteOutcome::Rejected { conflicts })
        }
    }

    /// Point lookup by composite key, skipping an expired row
    pub fn get_sync(&self, key: &RecordKey) -> Result<Option<TransitionRecord>> {
        let now = self.clock.now().timestamp();
        let conn = self.conn.lock().map_err(|_| lock_poisoned("get"))?;
        conn.query_row(
            SELECT_BY_KEY,
            params![key.task_id, key.prescription_id, now],
            record_from_row,
        )
        .optional()
        .map_err(from_rusqlite)
    }

    /// Delete by composite key
    pub fn delete_sync(&self, key: &RecordKey) -> Result<bool> {
        let conn = self.conn.lock().map_err(|_| lock_poisoned("delete"))?;
        let deleted = conn
            .execute(
                "DELETE FROM transition_records WHERE task_id = ?1 AND prescription_id = ?2",
                params![key.task_id, key.prescription_id],
            )
            .map_err(from_rusqlite)?;
        Ok(deleted > 0)
    }

    /// Number of stored rows, expired ones included
    pub fn count_sync(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| lock_poisoned("count"))?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM transition_records", [], |row| row.get(0))
            .map_err(from_rusqlite)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl TransitionStore for SqliteTransitionStore {
    async fn insert_batch_if_absent(&self, records: Vec<TransitionRecord>) -> Result<WriteOutcome> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.insert_batch_if_absent_sync(&records))
            .await
            .map_err(|e| join_error("insert_batch_if_absent", e))?
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<TransitionRecord>> {
        let this = self.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || this.get_sync(&key))
            .await
            .map_err(|e| join_error("get", e))?
    }

    async fn delete(&self, key: &RecordKey) -> Result<bool> {
        let this = self.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || this.delete_sync(&key))
            .await
            .map_err(|e| join_error("delete", e))?
    }
}
