//! PSU Engine - commit-and-notify pipeline
//!
//! Drives one batch of prescription status transitions through:
//! - inbound checks and record building
//! - an atomic all-or-nothing commit under a deadline
//! - notification dispatch with compensation on failure
//! - an optional test-interception harness
//! - response assembly

pub mod deadline;
pub mod intercept;
pub mod notify;
pub mod persistence;
pub mod pipeline;
pub mod previous;
pub mod response;
pub mod settings;

pub use deadline::{with_deadline, Deadline};
pub use intercept::{InterceptDecision, InterceptionPolicy, NoInterception, SyntheticInterception, SyntheticSets};
pub use notify::{DispatchOutcome, NotificationDispatcher};
pub use pipeline::{BatchRequest, Pipeline};
pub use response::{BatchResponse, ResponseEntry};
pub use settings::Settings;
