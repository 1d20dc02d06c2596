//! Response assembler
//!
//! Turns per-record outcomes into the outward result: an overall status and
//! one entry per record (or a single entry for batch-level failures),
//! renderable as a `transaction-response` bundle.

use chrono::{DateTime, SecondsFormat, Utc};
use psu_core::model::{BatchOutcome, PerRecordStatus, TransitionRecord};
use serde::Serialize;

const TIMEOUT_DIAGNOSTICS: &str =
    "The Server has timed out while processing the request sent by the client.";
const SERVER_ERROR_DIAGNOSTICS: &str = "The Server has encountered an error processing the request.";
const ACCEPTED_DIAGNOSTICS: &str = "Data not committed due to issues in other entries.";
const CREATED_DIAGNOSTICS: &str = "No issues detected during validation.";
const CONFLICT_DIAGNOSTICS: &str =
    "Request contains a task id and prescription id identical to a record already in the data store.";

/// One outward entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEntry {
    Created { full_url: String },
    /// Valid but not committed because another entry was rejected
    Accepted { full_url: String },
    Conflict { task_id: String },
    BadRequest { diagnostics: String },
    TooManyRequests,
    ServerError,
    Timeout,
}

impl ResponseEntry {
    pub fn http_status(&self) -> u16 {
        match self {
            ResponseEntry::Created { .. } => 201,
            ResponseEntry::Accepted { .. } => 200,
            ResponseEntry::Conflict { .. } => 409,
            ResponseEntry::BadRequest { .. } => 400,
            ResponseEntry::TooManyRequests => 429,
            ResponseEntry::ServerError => 500,
            ResponseEntry::Timeout => 504,
        }
    }

    pub fn status_line(&self) -> &'static str {
        match self {
            ResponseEntry::Created { .. } => "201 Created",
            ResponseEntry::Accepted { .. } => "200 OK",
            ResponseEntry::Conflict { .. } => "409 Conflict",
            ResponseEntry::BadRequest { .. } => "400 Bad Request",
            ResponseEntry::TooManyRequests => "429 Too Many Requests",
            ResponseEntry::ServerError => "500 Internal Server Error",
            ResponseEntry::Timeout => "504 The request timed out",
        }
    }

    fn to_bundle_entry(&self, now: &str) -> BundleEntry {
        let issue = match self {
            ResponseEntry::Created { .. } => Issue::new("success", "information", Some(CREATED_DIAGNOSTICS)),
            ResponseEntry::Accepted { .. } => {
                Issue::new("informational", "information", Some(ACCEPTED_DIAGNOSTICS))
            }
            ResponseEntry::Conflict { .. } => Issue {
                details: Some(Details {
                    coding: vec![Coding {
                        system: "https://fhir.nhs.uk/CodeSystem/http-error-codes",
                        code: "REC_CONFLICT",
                        display: "409: The Receiver identified a conflict.",
                    }],
                }),
                ..Issue::new("duplicate", "error", Some(CONFLICT_DIAGNOSTICS))
            },
            ResponseEntry::BadRequest { diagnostics } => {
                Issue::new("value", "error", Some(diagnostics.as_str()))
            }
            ResponseEntry::TooManyRequests => Issue::new("temporarily-forbidden", "error", None),
            ResponseEntry::ServerError => Issue::new("exception", "fatal", Some(SERVER_ERROR_DIAGNOSTICS)),
            ResponseEntry::Timeout => Issue::new("timeout", "fatal", Some(TIMEOUT_DIAGNOSTICS)),
        };

        let (full_url, location, last_modified) = match self {
            ResponseEntry::Created { full_url } | ResponseEntry::Accepted { full_url } => {
                (Some(full_url.clone()), None, None)
            }
            ResponseEntry::Conflict { task_id } => {
                (None, Some(format!("Task/{}", task_id)), Some(now.to_string()))
            }
            _ => (None, None, None),
        };

        BundleEntry {
            full_url,
            response: EntryResponse {
                status: self.status_line(),
                location,
                last_modified,
                outcome: OperationOutcome {
                    resource_type: "OperationOutcome",
                    meta: Meta {
                        last_updated: now.to_string(),
                    },
                    issue: vec![issue],
                },
            },
        }
    }
}

/// Outward result of one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResponse {
    pub status: u16,
    pub entries: Vec<ResponseEntry>,
}

impl BatchResponse {
    pub fn new(status: u16, entries: Vec<ResponseEntry>) -> Self {
        Self { status, entries }
    }

    /// A batch-level failure carried by a single entry
    pub fn single(entry: ResponseEntry) -> Self {
        Self::new(entry.http_status(), vec![entry])
    }

    /// Nothing to process
    pub fn empty() -> Self {
        Self::new(200, Vec::new())
    }

    pub fn bad_request(diagnostics: impl Into<String>) -> Self {
        Self::single(ResponseEntry::BadRequest {
            diagnostics: diagnostics.into(),
        })
    }

    pub fn server_error() -> Self {
        Self::single(ResponseEntry::ServerError)
    }

    /// Every entry created, in input order
    pub fn all_created(full_urls: &[String]) -> Self {
        Self::new(
            201,
            full_urls
                .iter()
                .map(|full_url| ResponseEntry::Created {
                    full_url: full_url.clone(),
                })
                .collect(),
        )
    }

    /// Map a commit outcome onto entries.
    ///
    /// `full_urls` and `records` are parallel, in input order.
    pub fn from_outcome(outcome: &BatchOutcome, records: &[TransitionRecord], full_urls: &[String]) -> Self {
        let Some(statuses) = outcome.record_statuses(records) else {
            return match outcome {
                BatchOutcome::TimedOut => Self::single(ResponseEntry::Timeout),
                _ => Self::server_error(),
            };
        };

        let entries = statuses
            .iter()
            .zip(records.iter().zip(full_urls))
            .map(|(status, (record, full_url))| match status {
                PerRecordStatus::Committed => ResponseEntry::Created {
                    full_url: full_url.clone(),
                },
                PerRecordStatus::Provisional => ResponseEntry::Accepted {
                    full_url: full_url.clone(),
                },
                PerRecordStatus::Conflicted => ResponseEntry::Conflict {
                    task_id: record.task_id.clone(),
                },
            })
            .collect();

        let status = match outcome {
            BatchOutcome::ConflictAt(_) => 409,
            _ => 201,
        };
        Self::new(status, entries)
    }

    /// Render as a `transaction-response` bundle
    pub fn to_bundle(&self, now: DateTime<Utc>) -> serde_json::Value {
        let now = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let bundle = Bundle {
            resource_type: "Bundle",
            kind: "transaction-response",
            entry: self.entries.iter().map(|e| e.to_bundle_entry(&now)).collect(),
        };
        serde_json::to_value(bundle).unwrap_or_else(|err| {
            tracing::error!(error = %err, "Failed to render response bundle");
            serde_json::Value::Null
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Bundle {
    resource_type: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    entry: Vec<BundleEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BundleEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    full_url: Option<String>,
    response: EntryResponse,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<String>,
    outcome: OperationOutcome,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OperationOutcome {
    resource_type: &'static str,
    meta: Meta,
    issue: Vec<Issue>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Meta {
    last_updated: String,
}

#[derive(Serialize)]
struct Issue {
    code: &'static str,
    severity: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Details>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<String>,
}

impl Issue {
    fn new(code: &'static str, severity: &'static str, diagnostics: Option<&str>) -> Self {
        Self {
            code,
            severity,
            details: None,
            diagnostics: diagnostics.map(str::to_string),
        }
    }
}

#[derive(Serialize)]
struct Details {
    coding: Vec<Coding>,
}

#[derive(Serialize)]
struct Coding {
    system: &'static str,
    code: &'static str,
    display: &'static str,
}
