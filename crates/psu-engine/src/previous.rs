//! Previous-state fetcher
//!
//! Looks up the stored record for every key in a batch, concurrently, so
//! status transitions can be logged with the time elapsed between them.
//! Lookups are best effort: a failed lookup is treated as "no previous".

use futures::future::join_all;
use psu_core::model::{RecordWithPrevious, TransitionRecord};
use psu_core::ports::TransitionStore;

/// Pair each record with whatever the store holds under its key
pub async fn fetch_previous(
    store: &dyn TransitionStore,
    records: &[TransitionRecord],
) -> Vec<RecordWithPrevious> {
    let lookups = records.iter().map(|record| async move {
        let previous = match store.get(&record.key()).await {
            Ok(previous) => previous,
            Err(err) => {
                tracing::error!(
                    task_id = %record.task_id,
                    error = %err,
                    "Error getting previous data item from data store"
                );
                None
            }
        };
        RecordWithPrevious::new(record.clone(), previous)
    });

    join_all(lookups).await
}

/// Log one event per record that has a previous snapshot
pub fn log_transitions(items: &[RecordWithPrevious]) {
    for item in items {
        let (Some(previous), Some(interval)) = (&item.previous, item.elapsed_seconds()) else {
            continue;
        };
        let current = &item.current;
        tracing::info!(
            prescription_id = %current.prescription_id,
            line_item_id = %current.line_item_id,
            site_code = %current.site_code,
            application_name = %current.application_name,
            when = %current.last_modified.to_rfc3339(),
            interval,
            new_status = %current.status,
            previous_status = %previous.status,
            new_terminal_status = %current.terminal_status,
            previous_terminal_status = %previous.terminal_status,
            "Transitioning item status"
        );
    }
}
