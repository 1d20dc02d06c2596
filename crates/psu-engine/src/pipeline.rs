//! Pipeline orchestration
//!
//! One call of [`Pipeline::process`] handles one inbound batch end to end:
//! inbound checks, record building, previous-state logging, the test
//! harness, the atomic commit, notification dispatch and the outward
//! response. A dispatch failure after a successful commit is compensated by
//! deleting every committed key once.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use psu_core::builder::{build_records, invalid_site_codes};
use psu_core::clock::Clock;
use psu_core::errors::PsuError;
use psu_core::model::{BatchOutcome, TransitionEvent, TransitionRecord};
use psu_core::ports::{NotificationQueue, ParameterSource, SecretSource, TransitionStore};
use psu_core::{log_op_end, log_op_start};
use psu_core_types::{RequestContext, RequestId};
use serde::Deserialize;

use crate::intercept::{InterceptDecision, InterceptionPolicy, NoInterception, SyntheticInterception};
use crate::notify::NotificationDispatcher;
use crate::persistence::commit;
use crate::previous::{fetch_previous, log_transitions};
use crate::response::{BatchResponse, ResponseEntry};
use crate::settings::Settings;

/// An inbound batch with its correlation headers
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub events: Vec<TransitionEvent>,
}

impl BatchRequest {
    pub fn new(events: Vec<TransitionEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }
}

pub struct Pipeline {
    settings: Settings,
    store: Arc<dyn TransitionStore>,
    dispatcher: NotificationDispatcher,
    policy: Arc<dyn InterceptionPolicy>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    /// Wire a pipeline from its collaborators.
    ///
    /// The interception policy is fixed here: the synthetic harness in the
    /// integration environment, nothing anywhere else.
    pub fn new(
        settings: Settings,
        store: Arc<dyn TransitionStore>,
        queue: Arc<dyn NotificationQueue>,
        parameters: Arc<dyn ParameterSource>,
        secrets: Arc<dyn SecretSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy: Arc<dyn InterceptionPolicy> = if settings.interception_enabled() {
            Arc::new(SyntheticInterception::new(
                parameters.clone(),
                settings.test_prescription_params.clone(),
            ))
        } else {
            Arc::new(NoInterception)
        };

        let dispatcher =
            NotificationDispatcher::new(queue, parameters, secrets, settings.notify_params.clone())
                .with_queue_url(settings.queue_url.clone())
                .with_salt_secret(settings.salt_secret_name.clone());

        Self {
            settings,
            store,
            dispatcher,
            policy,
            clock,
        }
    }

    /// Replace the interception policy chosen at construction
    pub fn with_policy(mut self, policy: Arc<dyn InterceptionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Process one batch. Never fails: every failure maps to an outward status.
    pub async fn process(&self, request: BatchRequest) -> BatchResponse {
        let start = Instant::now();
        log_op_start!("process_batch", batch_len = request.events.len());

        let response = self.run(request).await;

        log_op_end!(
            "process_batch",
            duration_ms = start.elapsed().as_millis() as u64,
            status = response.status
        );
        response
    }

    async fn run(&self, request: BatchRequest) -> BatchResponse {
        let application_name = request
            .application_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());
        if self.settings.require_application_name && application_name.is_none() {
            let err = PsuError::MissingApplicationName;
            tracing::error!(error = %err, "Rejecting batch without application name");
            return BatchResponse::bad_request(err.to_string());
        }

        let Some(request_id) = RequestId::parse(request.request_id.as_deref()) else {
            let err = PsuError::MissingRequestId;
            tracing::error!(error = %err, "Rejecting batch without request id");
            return BatchResponse::bad_request(err.to_string());
        };

        let mut ctx = RequestContext::with_request_id(request_id);
        if let Some(name) = application_name {
            ctx = ctx.with_application_name(name);
        }

        if request.events.is_empty() {
            tracing::info!(request_id = %ctx.request_id, "No entries to process");
            return BatchResponse::empty();
        }

        let full_urls: Vec<String> = request.events.iter().map(|e| e.full_url.clone()).collect();
        let records = match build_records(&request.events, &ctx, self.clock.as_ref()) {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(request_id = %ctx.request_id, error = %err, "Failed to build records");
                return BatchResponse::bad_request(err.to_string());
            }
        };

        let invalid = invalid_site_codes(&records);
        if !invalid.is_empty() {
            let err = PsuError::InvalidSiteCodes { codes: invalid };
            tracing::error!(request_id = %ctx.request_id, error = %err, "Rejecting batch");
            return BatchResponse::bad_request(err.to_string());
        }

        let items = fetch_previous(self.store.as_ref(), &records).await;
        log_transitions(&items);

        let decision = match self.policy.inspect(&records, self.store.as_ref()).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!(request_id = %ctx.request_id, error = %err, "Interception check failed");
                return BatchResponse::server_error();
            }
        };
        match &decision {
            InterceptDecision::RejectBadRequest => {
                return BatchResponse::bad_request(
                    "Simulated failure to write to database for test prescription.",
                );
            }
            InterceptDecision::RejectCapacity => {
                return BatchResponse::single(ResponseEntry::TooManyRequests);
            }
            InterceptDecision::Misuse(err) => {
                tracing::error!(
                    request_id = %ctx.request_id,
                    error = %err,
                    "Batch refused: synthetic prescription sets misconfigured"
                );
                return BatchResponse::server_error();
            }
            _ => {}
        }

        let outcome = commit(
            self.store.clone(),
            records.clone(),
            self.settings.commit_timeout,
            &ctx.request_id,
        )
        .await;

        match outcome {
            BatchOutcome::AllCommitted => {
                if decision == InterceptDecision::ForceErrorAfterCommit {
                    tracing::info!(
                        request_id = %ctx.request_id,
                        "Forcing error for INT test prescription"
                    );
                    return BatchResponse::server_error();
                }
                match self.dispatcher.dispatch(ctx.request_id.as_str(), &items).await {
                    Ok(_) => BatchResponse::all_created(&full_urls),
                    Err(err) => {
                        tracing::error!(
                            request_id = %ctx.request_id,
                            error = %err,
                            "Notification dispatch failed, removing committed records"
                        );
                        self.compensate(&records).await;
                        BatchResponse::server_error()
                    }
                }
            }
            BatchOutcome::ConflictAt(_) if decision == InterceptDecision::ForceSuccessOnConflict => {
                tracing::info!(
                    request_id = %ctx.request_id,
                    "Forcing success for INT test prescription"
                );
                BatchResponse::all_created(&full_urls)
            }
            other => {
                match &other {
                    BatchOutcome::TimedOut => {
                        tracing::error!(request_id = %ctx.request_id, "Batch commit timed out");
                    }
                    BatchOutcome::Failed(err) => {
                        tracing::error!(
                            request_id = %ctx.request_id,
                            error = %err,
                            "Batch commit failed"
                        );
                    }
                    _ => {}
                }
                BatchResponse::from_outcome(&other, &records, &full_urls)
            }
        }
    }

    /// Delete every committed key once; failures are logged, never retried
    async fn compensate(&self, records: &[TransitionRecord]) {
        let deletes = records.iter().map(|record| async move {
            let key = record.key();
            if let Err(err) = self.store.delete(&key).await {
                tracing::error!(
                    task_id = %key.task_id,
                    prescription_id = %key.prescription_id,
                    error = %err,
                    "Failed to remove committed record"
                );
            }
        });
        join_all(deletes).await;
    }
}
