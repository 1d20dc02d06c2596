use psu_core::model::RecordWithPrevious;
use psu_core::notify_config::NotifyConfig;

/// Status prefix (case-insensitive) that makes a record notifiable
pub const READY_TO_COLLECT_PREFIX: &str = "ready to collect";

pub fn is_ready_status(status: &str) -> bool {
    status.to_lowercase().starts_with(READY_TO_COLLECT_PREFIX)
}

/// Records that should produce a notification, in input order.
///
/// A record qualifies when its status is a "ready to collect" status and
/// its site or submitting system is enabled, unless the site is blocked.
pub fn select_for_notification<'a>(
    items: &'a [RecordWithPrevious],
    config: &NotifyConfig,
) -> Vec<&'a RecordWithPrevious> {
    let ready: Vec<_> = items
        .iter()
        .filter(|item| is_ready_status(&item.current.status))
        .collect();

    let allowed: Vec<_> = ready
        .iter()
        .copied()
        .filter(|item| config.allows(&item.current.site_code, &item.current.application_name))
        .collect();

    tracing::info!(
        num_items_received = items.len(),
        num_items_ready = ready.len(),
        num_items_allowed = allowed.len(),
        "Filtered out sites and suppliers that are not enabled, or are explicitly disabled"
    );

    allowed
}
