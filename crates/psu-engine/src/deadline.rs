//! Deadline guard
//!
//! Races an operation against a wall-clock budget without cancelling it.
//! The operation runs as its own task; if the budget elapses first the
//! task's handle is dropped, which detaches it. A detached store write can
//! still land (or fail) after the caller has reported a timeout, so a
//! client retry may then observe a conflict for data it was told timed out.

use std::future::Future;
use std::time::Duration;

use psu_core::errors::{ExError, ExErrorKind, Result};

/// Result of racing an operation against its budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deadline<T> {
    Completed(T),
    TimedOut,
}

/// Run `operation` with a wall-clock budget.
///
/// # Errors
///
/// Returns `Internal` if the operation panicked before the budget elapsed.
pub async fn with_deadline<F, T>(budget: Duration, operation: F) -> Result<Deadline<T>>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(operation);

    match tokio::time::timeout(budget, handle).await {
        Ok(Ok(value)) => Ok(Deadline::Completed(value)),
        Ok(Err(join_err)) => Err(ExError::new(ExErrorKind::Internal)
            .with_op("with_deadline")
            .with_message(format!("guarded operation failed: {}", join_err))),
        // The handle is gone with the timeout future; the task keeps running.
        Err(_elapsed) => Ok(Deadline::TimedOut),
    }
}
