use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Composite uniqueness key of a stored record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub task_id: String,
    pub prescription_id: String,
}

impl RecordKey {
    pub fn new(task_id: impl Into<String>, prescription_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            prescription_id: prescription_id.into(),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.prescription_id, self.task_id)
    }
}

/// A persistable status transition
///
/// Records are inserted at most once and never updated in place: a later
/// status for the same key is a new insert attempt, which the store rejects
/// as a conflict. The serialised form is also the notification body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    #[serde(rename = "TaskID")]
    pub task_id: String,

    #[serde(rename = "PrescriptionID")]
    pub prescription_id: String,

    #[serde(rename = "LineItemID")]
    pub line_item_id: String,

    #[serde(rename = "PatientID")]
    pub patient_id: String,

    /// Normalised (trimmed, uppercase) dispensing site code
    #[serde(rename = "SiteCode")]
    pub site_code: String,

    #[serde(rename = "ApplicationName")]
    pub application_name: String,

    #[serde(rename = "RequestID")]
    pub request_id: String,

    #[serde(rename = "Status")]
    pub status: String,

    #[serde(rename = "TerminalStatus")]
    pub terminal_status: String,

    #[serde(rename = "LastModified")]
    pub last_modified: DateTime<Utc>,

    #[serde(rename = "RepeatNo", default, skip_serializing_if = "Option::is_none")]
    pub repeat_number: Option<u32>,

    /// Store-managed expiry, epoch seconds
    #[serde(rename = "ExpiryTime")]
    pub expiry_time: i64,
}

impl TransitionRecord {
    /// The record's uniqueness key
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.task_id, &self.prescription_id)
    }
}

/// A record paired with whatever was stored under its key before it
#[derive(Debug, Clone, PartialEq)]
pub struct RecordWithPrevious {
    pub current: TransitionRecord,
    pub previous: Option<TransitionRecord>,
}

impl RecordWithPrevious {
    pub fn new(current: TransitionRecord, previous: Option<TransitionRecord>) -> Self {
        Self { current, previous }
    }

    /// Seconds between the previous and current LastModified, if there is a previous
    pub fn elapsed_seconds(&self) -> Option<f64> {
        self.previous.as_ref().map(|prev| {
            let delta = self.current.last_modified - prev.last_modified;
            delta.num_milliseconds() as f64 / 1000.0
        })
    }
}
