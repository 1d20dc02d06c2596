//! Record builder
//!
//! Maps validated transition events onto persistable records. Pure apart
//! from reading the injected clock for the expiry time.

use chrono::{DateTime, Utc};
use psu_core_types::RequestContext;

use crate::clock::Clock;
use crate::errors::PsuError;
use crate::model::{TransitionEvent, TransitionRecord};

/// Store-managed expiry offset: records are kept for two years
pub const TTL_DELTA_SECS: i64 = 60 * 60 * 24 * 365 * 2;

/// Trim and uppercase a submitted site code
pub fn normalise_site_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// `^[A-Z0-9]+$`
pub fn is_valid_site_code(code: &str) -> bool {
    !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Build a single record from an event
///
/// # Errors
///
/// Returns `InvalidTimestamp` if `last_modified` is not RFC3339.
pub fn build_record(
    event: &TransitionEvent,
    ctx: &RequestContext,
    now: DateTime<Utc>,
) -> Result<TransitionRecord, PsuError> {
    let last_modified = DateTime::parse_from_rfc3339(&event.last_modified)
        .map_err(|_| PsuError::InvalidTimestamp {
            task_id: event.task_id.clone(),
            value: event.last_modified.clone(),
        })?
        .with_timezone(&Utc);

    Ok(TransitionRecord {
        task_id: event.task_id.clone(),
        prescription_id: event.prescription_id.to_uppercase(),
        line_item_id: event.line_item_id.to_uppercase(),
        patient_id: event.patient_id.clone(),
        site_code: normalise_site_code(&event.site_code),
        application_name: ctx.application_name.clone(),
        request_id: ctx.request_id.to_string(),
        status: event.business_status.clone(),
        terminal_status: event.terminal_status.clone(),
        last_modified,
        repeat_number: event.repeat_number,
        expiry_time: now.timestamp() + TTL_DELTA_SECS,
    })
}

/// Build records for a whole batch, preserving input order
///
/// # Errors
///
/// Fails on the first event whose timestamp cannot be parsed.
pub fn build_records(
    events: &[TransitionEvent],
    ctx: &RequestContext,
    clock: &dyn Clock,
) -> Result<Vec<TransitionRecord>, PsuError> {
    let now = clock.now();
    events
        .iter()
        .map(|event| {
            tracing::debug!(task_id = %event.task_id, "Building record for task");
            build_record(event, ctx, now)
        })
        .collect()
}

/// Site codes (as normalised) that fail validation, in batch order
pub fn invalid_site_codes(records: &[TransitionRecord]) -> Vec<String> {
    records
        .iter()
        .filter(|r| !is_valid_site_code(&r.site_code))
        .map(|r| r.site_code.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use psu_core_types::RequestId;

    fn event() -> TransitionEvent {
        TransitionEvent {
            full_url: "urn:uuid:0ae4daf3-f24b-479d-b8fa-b69e2d873b60".to_string(),
            task_id: "0ae4daf3-f24b-479d-b8fa-b69e2d873b60".to_string(),
            prescription_id: "480720-a83008-57ff06".to_string(),
            line_item_id: "e3843418-1900-44a1-8f6a-bff8601893b8".to_string(),
            patient_id: "9449304130".to_string(),
            site_code: " c9z1o ".to_string(),
            business_status: "Ready to collect".to_string(),
            terminal_status: "in-progress".to_string(),
            last_modified: "2023-09-11T10:11:12Z".to_string(),
            repeat_number: Some(2),
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::with_request_id(RequestId::from_string("req-1".to_string()))
            .with_application_name("test-app")
    }

    #[test]
    fn test_build_record_normalises_identifiers() {
        let now = Utc::now();
        let record = build_record(&event(), &ctx(), now).unwrap();

        assert_eq!(record.prescription_id, "480720-A83008-57FF06");
        assert_eq!(record.line_item_id, "E3843418-1900-44A1-8F6A-BFF8601893B8");
        assert_eq!(record.site_code, "C9Z1O");
        assert_eq!(record.task_id, "0ae4daf3-f24b-479d-b8fa-b69e2d873b60");
        assert_eq!(record.application_name, "test-app");
        assert_eq!(record.request_id, "req-1");
        assert_eq!(record.repeat_number, Some(2));
        assert_eq!(record.expiry_time, now.timestamp() + TTL_DELTA_SECS);
    }

    #[test]
    fn test_build_records_uses_clock_for_expiry() {
        let start = DateTime::parse_from_rfc3339("2023-09-11T10:11:12Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = ManualClock::new(start);
        let records = build_records(&[event(), event()], &ctx(), &clock).unwrap();

        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|r| r.expiry_time == start.timestamp() + TTL_DELTA_SECS));
    }

    #[test]
    fn test_bad_timestamp_is_rejected() {
        let mut bad = event();
        bad.last_modified = "yesterday".to_string();
        let err = build_record(&bad, &ctx(), Utc::now()).unwrap_err();
        assert!(matches!(err, PsuError::InvalidTimestamp { .. }));
    }

    #[test]
    fn test_site_code_validation() {
        assert!(is_valid_site_code("C9Z1O"));
        assert!(!is_valid_site_code(""));
        assert!(!is_valid_site_code("C9-Z1O"));
        assert!(!is_valid_site_code("C9 Z1O"));
    }

    #[test]
    fn test_invalid_site_codes_reported_in_order() {
        let now = Utc::now();
        let mut a = event();
        a.site_code = "AB_1".to_string();
        let mut b = event();
        b.site_code = "ok1".to_string();
        let mut c = event();
        c.site_code = "x y".to_string();

        let records: Vec<_> = [a, b, c]
            .iter()
            .map(|e| build_record(e, &ctx(), now).unwrap())
            .collect();
        assert_eq!(invalid_site_codes(&records), vec!["AB_1", "X Y"]);
    }
}
