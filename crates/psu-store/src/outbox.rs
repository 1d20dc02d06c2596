//! SQLite notification outbox
//!
//! A local [`NotificationQueue`] that appends messages to the
//! `notification_outbox` table. It mirrors the parts of the downstream
//! FIFO queue the pipeline depends on: at most ten entries per call,
//! distinct entry ids per call, and duplicate suppression by dedup id
//! within a time window (a suppressed message is still reported as sent).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use psu_core::clock::Clock;
use psu_core::errors::{ExError, ExErrorKind};
use psu_core::ports::{FailedEntry, NotificationQueue, QueueEntry, SendBatchReport, MAX_QUEUE_BATCH};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::db::SharedConnection;
use crate::errors::{from_rusqlite, join_error, lock_poisoned, Result};

/// Window within which a repeated dedup id is suppressed
pub const DEFAULT_DEDUP_WINDOW_SECS: i64 = 300;

/// A message held in the outbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxMessage {
    pub seq: i64,
    pub queue_url: String,
    pub entry_id: String,
    pub group_id: String,
    pub dedup_id: String,
    pub body: String,
    pub enqueued_at: DateTime<Utc>,
}

fn rejected(message: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::ExternalService)
        .with_op("send_batch")
        .with_message(message)
}

#[derive(Clone)]
pub struct SqliteOutboxQueue {
    conn: SharedConnection,
    clock: Arc<dyn Clock>,
    dedup_window: Duration,
}

impl SqliteOutboxQueue {
    pub fn new(conn: SharedConnection, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn,
            clock,
            dedup_window: Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS),
        }
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn send_batch_sync(&self, queue_url: &str, entries: &[QueueEntry]) -> Result<SendBatchReport> {
        if entries.is_empty() || entries.len() > MAX_QUEUE_BATCH {
            return Err(rejected(format!(
                "batch must hold 1 to {} entries, got {}",
                MAX_QUEUE_BATCH,
                entries.len()
            )));
        }
        let mut ids = HashSet::new();
        if !entries.iter().all(|e| ids.insert(e.id.as_str())) {
            return Err(rejected("batch entry ids are not distinct"));
        }

        let now = self.clock.now();
        let window_start = (now - self.dedup_window).timestamp();

        let mut conn = self.conn.lock().map_err(|_| lock_poisoned("send_batch"))?;
        let tx = conn.transaction().map_err(from_rusqlite)?;
        let mut report = SendBatchReport::default();

        for entry in entries {
            if entry.body.trim().is_empty() {
                report.failed.push(FailedEntry {
                    id: entry.id.clone(),
                    code: "InvalidMessageContents".to_string(),
                    message: "message body must not be empty".to_string(),
                });
                continue;
            }

            let duplicate = tx
                .query_row(
                    "SELECT 1 FROM notification_outbox
                     WHERE queue_url = ?1 AND dedup_id = ?2 AND enqueued_at > ?3",
                    params![queue_url, entry.dedup_id, window_start],
                    |_| Ok(()),
                )
                .optional()
                .map_err(from_rusqlite)?
                .is_some();

            if duplicate {
                tracing::debug!(dedup_id = %entry.dedup_id, "Suppressed duplicate notification");
            } else {
                tx.execute(
                    "INSERT INTO notification_outbox
                        (queue_url, entry_id, group_id, dedup_id, body, enqueued_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        queue_url,
                        entry.id,
                        entry.group_id,
                        entry.dedup_id,
                        entry.body,
                        now.timestamp()
                    ],
                )
                .map_err(from_rusqlite)?;
            }
            report.successful.push(entry.id.clone());
        }

        tx.commit().map_err(from_rusqlite)?;
        Ok(report)
    }

    /// Messages held for a queue (or every queue), oldest first
    pub fn messages(&self, queue_url: Option<&str>) -> Result<Vec<OutboxMessage>> {
        let conn = self.conn.lock().map_err(|_| lock_poisoned("outbox_messages"))?;
        let mut stmt = conn
            .prepare(
                "SELECT seq, queue_url, entry_id, group_id, dedup_id, body, enqueued_at
                 FROM notification_outbox
                 WHERE ?1 IS NULL OR queue_url = ?1
                 ORDER BY seq",
            )
            .map_err(from_rusqlite)?;

        let rows = stmt
            .query_map(params![queue_url], |row| {
                let enqueued_at: i64 = row.get(6)?;
                Ok(OutboxMessage {
                    seq: row.get(0)?,
                    queue_url: row.get(1)?,
                    entry_id: row.get(2)?,
                    group_id: row.get(3)?,
                    dedup_id: row.get(4)?,
                    body: row.get(5)?,
                    enqueued_at: Utc
                        .timestamp_opt(enqueued_at, 0)
                        .single()
                        .unwrap_or_default(),
                })
            })
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        Ok(rows)
    }
}

#[async_trait]
impl NotificationQueue for SqliteOutboxQueue {
    async fn send_batch(&self, queue_url: &str, entries: Vec<QueueEntry>) -> Result<SendBatchReport> {
        let this = self.clone();
        let queue_url = queue_url.to_string();
        tokio::task::spawn_blocking(move || this.send_batch_sync(&queue_url, &entries))
            .await
            .map_err(|e| join_error("send_batch", e))?
    }
}
