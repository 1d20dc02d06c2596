//! Notification filter and dispatcher
//!
//! Runs strictly after a successful commit. Selects the records whose new
//! status should reach the patient, wraps them in queue envelopes and sends
//! them in chunks the queue accepts.

pub mod dispatcher;
pub mod filter;

pub use dispatcher::{DispatchOutcome, NotificationDispatcher};
pub use filter::{is_ready_status, select_for_notification, READY_TO_COLLECT_PREFIX};
