//! PSU Core - domain model and collaborator interfaces
//!
//! This crate provides the pieces of the prescription status update
//! pipeline that have no runtime behaviour of their own:
//! - Transition events, persisted records and batch outcomes
//! - The record builder and site-code validation
//! - Async ports for the store, the notification queue and the
//!   parameter/secret sources
//! - Notification configuration with a TTL-cached parameter source
//! - Salted dedup keys
//! - The error and logging facilities shared by every other crate

pub mod builder;
pub mod clock;
pub mod dedup;
pub mod errors;
pub mod logging_facility;
pub mod model;
pub mod notify_config;
pub mod ports;
pub mod sources;

// Re-export commonly used types
pub use builder::{build_records, invalid_site_codes};
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{ExError, ExErrorKind, PsuError, Result};
pub use model::{
    BatchOutcome, PerRecordStatus, RecordKey, RecordWithPrevious, TransitionEvent,
    TransitionRecord, WriteOutcome,
};
pub use notify_config::{CachedParameterSource, NotifyConfig, NotifyParameterNames};
pub use ports::{NotificationQueue, ParameterSource, SecretSource, TransitionStore};
