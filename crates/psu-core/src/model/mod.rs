pub mod event;
pub mod outcome;
pub mod record;

pub use event::TransitionEvent;
pub use outcome::{BatchOutcome, PerRecordStatus, WriteOutcome};
pub use record::{RecordKey, RecordWithPrevious, TransitionRecord};
