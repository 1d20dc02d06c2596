use std::sync::Arc;
use std::time::Instant;

use psu_core::dedup::{dedup_key, resolve_salt};
use psu_core::errors::{PsuError, Result};
use psu_core::model::{RecordWithPrevious, TransitionRecord};
use psu_core::notify_config::{load_notify_config, NotifyParameterNames};
use psu_core::ports::{NotificationQueue, ParameterSource, QueueEntry, SecretSource, MAX_QUEUE_BATCH};
use psu_core::{log_op_end, log_op_error, log_op_start};
use psu_core_types::Sensitive;

use super::filter::select_for_notification;

/// What a successful dispatch did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The feature flag is off
    Disabled,
    /// The configuration could not be fetched; treated as disabled
    ConfigUnavailable,
    Sent { messages: usize, chunks: usize },
}

/// Sends queue envelopes for committed records
pub struct NotificationDispatcher {
    queue: Arc<dyn NotificationQueue>,
    parameters: Arc<dyn ParameterSource>,
    secrets: Arc<dyn SecretSource>,
    names: NotifyParameterNames,
    queue_url: Option<String>,
    salt_secret_name: Option<String>,
}

impl NotificationDispatcher {
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        parameters: Arc<dyn ParameterSource>,
        secrets: Arc<dyn SecretSource>,
        names: NotifyParameterNames,
    ) -> Self {
        Self {
            queue,
            parameters,
            secrets,
            names,
            queue_url: None,
            salt_secret_name: None,
        }
    }

    pub fn with_queue_url(mut self, queue_url: Option<String>) -> Self {
        self.queue_url = queue_url;
        self
    }

    pub fn with_salt_secret(mut self, secret_name: Option<String>) -> Self {
        self.salt_secret_name = secret_name;
        self
    }

    /// Notify for every eligible record of a committed batch.
    ///
    /// # Errors
    ///
    /// Fails when the queue target is not configured, when the queue rejects
    /// a chunk, or when it reports any failed entry. Chunks sent before the
    /// failure are not recalled.
    pub async fn dispatch(
        &self,
        request_id: &str,
        items: &[RecordWithPrevious],
    ) -> Result<DispatchOutcome> {
        let config = match load_notify_config(self.parameters.as_ref(), &self.names).await {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(error = %err, "Failed to load notification parameters");
                return Ok(DispatchOutcome::ConfigUnavailable);
            }
        };
        if !config.notifications_enabled {
            tracing::info!("enableNotifications is not true, skipping the notification request");
            return Ok(DispatchOutcome::Disabled);
        }

        let Some(queue_url) = self.queue_url.as_deref() else {
            tracing::error!("Notifications SQS URL not found in environment variables");
            return Err(PsuError::QueueNotConfigured.into());
        };

        let start = Instant::now();
        log_op_start!("dispatch_notifications", batch_len = items.len());

        let selected = select_for_notification(items, &config);
        if selected.is_empty() {
            tracing::info!("No entries to post to the notifications SQS");
            log_op_end!(
                "dispatch_notifications",
                duration_ms = start.elapsed().as_millis() as u64
            );
            return Ok(DispatchOutcome::Sent {
                messages: 0,
                chunks: 0,
            });
        }

        let salt = resolve_salt(self.secrets.as_ref(), self.salt_secret_name.as_deref()).await;
        let records: Vec<&TransitionRecord> = selected.iter().map(|item| &item.current).collect();
        let chunks = build_envelopes(request_id, &records, &salt)?;

        // Sequential sends keep the request's group in order at the queue
        for entries in &chunks {
            let total = entries.len();
            match self.queue.send_batch(queue_url, entries.clone()).await {
                Ok(report) if report.failed.is_empty() => {
                    tracing::info!(
                        sent = report.successful.len(),
                        "Successfully sent a batch of prescriptions to the notifications SQS"
                    );
                }
                Ok(report) => {
                    let err = PsuError::DispatchRejected {
                        failed: report.failed.len(),
                        total,
                    };
                    for failed in &report.failed {
                        tracing::error!(
                            entry_id = %failed.id,
                            code = %failed.code,
                            message = %failed.message,
                            "Notification entry rejected by the queue"
                        );
                    }
                    log_op_error!(
                        "dispatch_notifications",
                        err,
                        duration_ms = start.elapsed().as_millis() as u64
                    );
                    return Err(err.into());
                }
                Err(err) => {
                    log_op_error!(
                        "dispatch_notifications",
                        err,
                        duration_ms = start.elapsed().as_millis() as u64
                    );
                    return Err(err);
                }
            }
        }

        log_op_end!(
            "dispatch_notifications",
            duration_ms = start.elapsed().as_millis() as u64,
            messages = records.len(),
            chunks = chunks.len()
        );
        Ok(DispatchOutcome::Sent {
            messages: records.len(),
            chunks: chunks.len(),
        })
    }
}

/// Queue envelopes in chunks of at most [`MAX_QUEUE_BATCH`]
///
/// Entry ids are the index within the chunk; bodies are the record JSON.
///
/// # Errors
///
/// Returns `Serialization` if a record cannot be encoded.
pub fn build_envelopes(
    request_id: &str,
    records: &[&TransitionRecord],
    salt: &Sensitive<String>,
) -> Result<Vec<Vec<QueueEntry>>> {
    records
        .chunks(MAX_QUEUE_BATCH)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .map(|(idx, record)| -> Result<QueueEntry> {
                    Ok(QueueEntry {
                        id: idx.to_string(),
                        body: serde_json::to_string(record)?,
                        group_id: request_id.to_string(),
                        dedup_id: dedup_key(&record.patient_id, &record.site_code, salt),
                    })
                })
                .collect()
        })
        .collect()
}
