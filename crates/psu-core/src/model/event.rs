use serde::{Deserialize, Serialize};

/// A validated status transition as submitted by a dispensing system
///
/// Field-level validation happens upstream; by the time an event reaches the
/// pipeline every required field is present. Identifiers are kept exactly as
/// submitted; normalisation is the record builder's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    /// Entry URL used to correlate the outward response entry (`urn:uuid:<task id>`)
    pub full_url: String,

    pub task_id: String,
    pub prescription_id: String,
    pub line_item_id: String,
    pub patient_id: String,
    pub site_code: String,

    /// Business status code, e.g. "Ready to collect"
    pub business_status: String,

    /// Task lifecycle status, e.g. "in-progress" or "completed"
    pub terminal_status: String,

    /// RFC3339 timestamp of the transition
    pub last_modified: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_number: Option<u32>,
}
