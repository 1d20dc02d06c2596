#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use psu_core::clock::ManualClock;
use psu_core::dedup::salted_hash;
use psu_core::logging_facility::init_test_capture;
use psu_core::model::{RecordKey, TransitionEvent};
use psu_core::notify_config::NotifyParameterNames;
use psu_core::sources::{StaticParameterSource, StaticSecretSource};
use psu_core_types::schema::EVENT_END_ERROR;
use psu_engine::{BatchRequest, BatchResponse, Pipeline, ResponseEntry, Settings};
use psu_store::{MemoryNotificationQueue, MemoryTransitionStore};
use tracing::Level;

const QUEUE_URL: &str = "local://notify.fifo";

struct Harness {
    store: Arc<MemoryTransitionStore>,
    queue: Arc<MemoryNotificationQueue>,
    parameters: Arc<StaticParameterSource>,
    pipeline: Pipeline,
}

fn settings() -> Settings {
    Settings {
        notify_params: NotifyParameterNames {
            enable_notifications: Some("ENABLE_NOTIFICATIONS".to_string()),
            enabled_site_codes: Some("ENABLED_SITES".to_string()),
            enabled_systems: Some("ENABLED_SYSTEMS".to_string()),
            blocked_site_codes: Some("BLOCKED_SITES".to_string()),
        },
        salt_secret_name: Some("SQS_SALT".to_string()),
        queue_url: Some(QUEUE_URL.to_string()),
        ..Settings::default()
    }
}

fn harness_with(settings: Settings, parameters: StaticParameterSource) -> Harness {
    let store = Arc::new(MemoryTransitionStore::new());
    let queue = Arc::new(MemoryNotificationQueue::new());
    let parameters = Arc::new(parameters);
    let secrets = Arc::new(StaticSecretSource::new().with("SQS_SALT", serde_json::json!({"salt": "salt"})));
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()));

    let pipeline = Pipeline::new(
        settings,
        store.clone(),
        queue.clone(),
        parameters.clone(),
        secrets,
        clock,
    );
    Harness {
        store,
        queue,
        parameters,
        pipeline,
    }
}

fn notify_parameters() -> StaticParameterSource {
    StaticParameterSource::new()
        .with("ENABLE_NOTIFICATIONS", "true")
        .with("ENABLED_SITES", "FA565")
        .with("ENABLED_SYSTEMS", "")
        .with("BLOCKED_SITES", "B3J1Z")
}

fn harness() -> Harness {
    harness_with(settings(), notify_parameters())
}

fn int_harness() -> Harness {
    let settings = Settings {
        environment: "INT".to_string(),
        ..settings()
    };
    let parameters = notify_parameters()
        .with("TEST_PRESCRIPTIONS_1", "AAAAAA-A83008-1EEEA0")
        .with("TEST_PRESCRIPTIONS_2", "BBBBBB-A83008-1EEEA0, ")
        .with("TEST_PRESCRIPTIONS_3", "cccccc-a83008-1eeea0")
        .with("TEST_PRESCRIPTIONS_4", "DDDDDD-A83008-1EEEA0");
    harness_with(settings, parameters)
}

fn event(task_id: &str, prescription_id: &str, status: &str) -> TransitionEvent {
    TransitionEvent {
        full_url: format!("urn:uuid:{}", task_id),
        task_id: task_id.to_string(),
        prescription_id: prescription_id.to_string(),
        line_item_id: format!("{}-item", task_id),
        patient_id: "9449304130".to_string(),
        site_code: "fa565".to_string(),
        business_status: status.to_string(),
        terminal_status: "in-progress".to_string(),
        last_modified: "2024-01-01T11:59:00Z".to_string(),
        repeat_number: None,
    }
}

fn request(events: Vec<TransitionEvent>) -> BatchRequest {
    BatchRequest::new(events)
        .with_request_id("req-1")
        .with_application_name("Internal Test System")
}

fn request_with_id(request_id: &str, events: Vec<TransitionEvent>) -> BatchRequest {
    BatchRequest::new(events)
        .with_request_id(request_id)
        .with_application_name("Internal Test System")
}

fn key(task_id: &str, prescription_id: &str) -> RecordKey {
    RecordKey::new(task_id, prescription_id)
}

#[tokio::test]
async fn test_all_records_created_and_notified() {
    let h = harness();
    let events = vec![
        event("t1", "07A66F-A83008-1EEEA0", "Ready to collect"),
        event("t2", "07A66F-A83008-1EEEA1", "With Pharmacy"),
    ];

    let response = h.pipeline.process(request(events)).await;

    assert_eq!(response.status, 201);
    assert_eq!(
        response.entries,
        vec![
            ResponseEntry::Created {
                full_url: "urn:uuid:t1".to_string()
            },
            ResponseEntry::Created {
                full_url: "urn:uuid:t2".to_string()
            },
        ]
    );
    assert_eq!(h.store.len(), 2);

    let sent = h.queue.sent_entries();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].group_id, "req-1");
    assert_eq!(sent[0].dedup_id, salted_hash("9449304130:FA565", "salt"));
    let body: serde_json::Value = serde_json::from_str(&sent[0].body).unwrap();
    assert_eq!(body["TaskID"], "t1");
    assert_eq!(body["SiteCode"], "FA565");
    assert_eq!(body["ApplicationName"], "Internal Test System");
}

#[tokio::test]
async fn test_conflict_rolls_back_whole_batch() {
    let h = harness();
    let first = h
        .pipeline
        .process(request(vec![event("t2", "07A66F-A83008-1EEEA1", "With Pharmacy")]))
        .await;
    assert_eq!(first.status, 201);

    let response = h
        .pipeline
        .process(request(vec![
            event("t1", "07A66F-A83008-1EEEA0", "Ready to collect"),
            event("t2", "07A66F-A83008-1EEEA1", "Ready to collect"),
        ]))
        .await;

    assert_eq!(response.status, 409);
    assert_eq!(
        response.entries,
        vec![
            ResponseEntry::Accepted {
                full_url: "urn:uuid:t1".to_string()
            },
            ResponseEntry::Conflict {
                task_id: "t2".to_string()
            },
        ]
    );
    assert!(!h.store.contains(&key("t1", "07A66F-A83008-1EEEA0")));
    assert_eq!(h.queue.call_count(), 0);
}

#[tokio::test]
async fn test_duplicate_key_within_batch_conflicts() {
    let h = harness();
    let response = h
        .pipeline
        .process(request(vec![
            event("t1", "07A66F-A83008-1EEEA0", "With Pharmacy"),
            event("t1", "07A66F-A83008-1EEEA0", "Ready to collect"),
        ]))
        .await;

    assert_eq!(response.status, 409);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_twelve_ready_records_sent_in_two_chunks() {
    let h = harness();
    let events: Vec<_> = (0..12)
        .map(|i| event(&format!("t{}", i), &format!("07A66F-A83008-1EEE{:02}", i), "Ready to collect"))
        .collect();

    let response = h.pipeline.process(request(events)).await;

    assert_eq!(response.status, 201);
    let calls = h.queue.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].entries.len(), 10);
    assert_eq!(calls[1].entries.len(), 2);
    assert!(calls.iter().all(|c| c.queue_url == QUEUE_URL));
}

#[tokio::test]
async fn test_dispatch_failure_compensates_and_returns_500() {
    let h = harness();
    h.queue.reject_calls_from(0);
    let events = vec![
        event("t1", "07A66F-A83008-1EEEA0", "Ready to collect"),
        event("t2", "07A66F-A83008-1EEEA1", "With Pharmacy"),
    ];

    let response = h.pipeline.process(request(events)).await;

    assert_eq!(response, BatchResponse::server_error());
    assert!(h.store.is_empty());
    let mut deleted = h.store.delete_calls();
    deleted.sort();
    assert_eq!(
        deleted,
        vec![key("t1", "07A66F-A83008-1EEEA0"), key("t2", "07A66F-A83008-1EEEA1")]
    );
}

#[tokio::test]
async fn test_failed_queue_entry_compensates() {
    let h = harness();
    h.queue.fail_entry("0");

    let response = h
        .pipeline
        .process(request(vec![event("t1", "07A66F-A83008-1EEEA0", "Ready to collect")]))
        .await;

    assert_eq!(response.status, 500);
    assert_eq!(h.store.delete_calls().len(), 1);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_compensation_delete_failures_are_not_retried() {
    let h = harness();
    h.queue.reject_calls_from(0);
    h.store.fail_deletes("store unavailable");

    let response = h
        .pipeline
        .process(request(vec![event("t1", "07A66F-A83008-1EEEA0", "Ready to collect")]))
        .await;

    assert_eq!(response.status, 500);
    assert_eq!(h.store.delete_calls(), vec![key("t1", "07A66F-A83008-1EEEA0")]);
}

#[tokio::test]
async fn test_missing_queue_url_compensates() {
    let settings = Settings {
        queue_url: None,
        ..settings()
    };
    let h = harness_with(settings, notify_parameters());

    let response = h
        .pipeline
        .process(request(vec![event("t1", "07A66F-A83008-1EEEA0", "With Pharmacy")]))
        .await;

    assert_eq!(response.status, 500);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_disabled_notifications_still_commit() {
    let h = harness();
    h.parameters.set("ENABLE_NOTIFICATIONS", "false");

    let response = h
        .pipeline
        .process(request(vec![event("t1", "07A66F-A83008-1EEEA0", "Ready to collect")]))
        .await;

    assert_eq!(response.status, 201);
    assert_eq!(h.queue.call_count(), 0);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_blocked_site_not_notified() {
    let h = harness();
    h.parameters.set("ENABLED_SYSTEMS", "Internal Test System");
    let mut blocked = event("t1", "07A66F-A83008-1EEEA0", "Ready to collect");
    blocked.site_code = "b3j1z".to_string();

    let response = h.pipeline.process(request(vec![blocked])).await;

    assert_eq!(response.status, 201);
    assert_eq!(h.queue.call_count(), 0);
}

#[tokio::test]
async fn test_store_failure_returns_500() {
    let h = harness();
    h.store.fail_writes("store unavailable");

    let response = h
        .pipeline
        .process(request(vec![event("t1", "07A66F-A83008-1EEEA0", "With Pharmacy")]))
        .await;

    assert_eq!(response, BatchResponse::server_error());
    assert_eq!(h.queue.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_commit_timeout_returns_504_and_write_may_land_later() {
    let h = harness();
    h.store.delay_writes(Duration::from_secs(20));

    let response = h
        .pipeline
        .process(request(vec![event("t1", "07A66F-A83008-1EEEA0", "Ready to collect")]))
        .await;

    assert_eq!(response, BatchResponse::single(ResponseEntry::Timeout));
    assert_eq!(response.status, 504);
    assert_eq!(h.queue.call_count(), 0);
    assert!(h.store.is_empty());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(h.store.contains(&key("t1", "07A66F-A83008-1EEEA0")));
}

#[tokio::test]
async fn test_empty_batch_returns_200() {
    let h = harness();
    let response = h.pipeline.process(request(Vec::new())).await;

    assert_eq!(response, BatchResponse::empty());
    assert_eq!(h.store.insert_calls(), 0);
}

#[tokio::test]
async fn test_missing_request_id_is_rejected() {
    let h = harness();
    let request = BatchRequest::new(vec![event("t1", "07A66F-A83008-1EEEA0", "With Pharmacy")])
        .with_request_id("   ");

    let response = h.pipeline.process(request).await;

    assert_eq!(
        response,
        BatchResponse::bad_request("Missing or empty x-request-id header.")
    );
    assert_eq!(h.store.insert_calls(), 0);
}

#[tokio::test]
async fn test_invalid_site_codes_are_rejected() {
    let h = harness();
    let mut bad = event("t2", "07A66F-A83008-1EEEA1", "With Pharmacy");
    bad.site_code = "FA 565".to_string();
    let response = h
        .pipeline
        .process(request(vec![event("t1", "07A66F-A83008-1EEEA0", "With Pharmacy"), bad]))
        .await;

    assert_eq!(response.status, 400);
    match &response.entries[..] {
        [ResponseEntry::BadRequest { diagnostics }] => assert!(diagnostics.contains("FA 565")),
        other => panic!("unexpected entries {:?}", other),
    }
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_application_name_required_when_configured() {
    let settings = Settings {
        require_application_name: true,
        ..settings()
    };
    let h = harness_with(settings, notify_parameters());
    let request = BatchRequest::new(vec![event("t1", "07A66F-A83008-1EEEA0", "With Pharmacy")])
        .with_request_id("req-1");

    let response = h.pipeline.process(request).await;

    assert_eq!(response.status, 400);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_application_name_defaults_to_unknown() {
    let h = harness();
    let request = BatchRequest::new(vec![event("t1", "07A66F-A83008-1EEEA0", "Ready to collect")])
        .with_request_id("req-1");

    let response = h.pipeline.process(request).await;

    assert_eq!(response.status, 201);
    let body: serde_json::Value = serde_json::from_str(&h.queue.sent_entries()[0].body).unwrap();
    assert_eq!(body["ApplicationName"], "unknown");
}

#[tokio::test]
async fn test_harness_is_inert_outside_integration() {
    let h = harness();
    h.parameters.set("TEST_PRESCRIPTIONS_4", "07A66F-A83008-1EEEA0");

    let response = h
        .pipeline
        .process(request(vec![event("t1", "07A66F-A83008-1EEEA0", "With Pharmacy")]))
        .await;

    assert_eq!(response.status, 201);
}

#[tokio::test]
async fn test_set_a_first_sighting_commits_then_fails() {
    let h = int_harness();
    let events = vec![event("t1", "AAAAAA-A83008-1EEEA0", "Ready to collect")];

    let first = h.pipeline.process(request(events.clone())).await;
    assert_eq!(first, BatchResponse::server_error());
    assert!(h.store.contains(&key("t1", "AAAAAA-A83008-1EEEA0")));
    assert_eq!(h.queue.call_count(), 0);

    let retry = h.pipeline.process(request(events)).await;
    assert_eq!(retry.status, 201);
    assert_eq!(
        retry.entries,
        vec![ResponseEntry::Created {
            full_url: "urn:uuid:t1".to_string()
        }]
    );
    assert_eq!(h.queue.call_count(), 0);
}

#[tokio::test]
async fn test_set_b_replay_conflicts_naturally() {
    let h = int_harness();
    let events = vec![event("t1", "bbbbbb-a83008-1eeea0", "With Pharmacy")];

    let first = h.pipeline.process(request(events.clone())).await;
    assert_eq!(first.status, 500);

    let retry = h.pipeline.process(request(events)).await;
    assert_eq!(retry.status, 409);
    assert_eq!(
        retry.entries,
        vec![ResponseEntry::Conflict {
            task_id: "t1".to_string()
        }]
    );
}

#[tokio::test]
async fn test_set_c_rejects_without_persisting() {
    let h = int_harness();
    let response = h
        .pipeline
        .process(request(vec![event("t1", "CCCCCC-A83008-1EEEA0", "With Pharmacy")]))
        .await;

    assert_eq!(
        response,
        BatchResponse::bad_request("Simulated failure to write to database for test prescription.")
    );
    assert_eq!(h.store.insert_calls(), 0);
}

#[tokio::test]
async fn test_set_d_returns_429() {
    let h = int_harness();
    let response = h
        .pipeline
        .process(request(vec![event("t1", "DDDDDD-A83008-1EEEA0", "With Pharmacy")]))
        .await;

    assert_eq!(response.status, 429);
    assert_eq!(h.store.insert_calls(), 0);
}

#[tokio::test]
async fn test_batch_matching_two_sets_is_refused() {
    let h = int_harness();
    let response = h
        .pipeline
        .process(request(vec![
            event("t1", "AAAAAA-A83008-1EEEA0", "With Pharmacy"),
            event("t2", "DDDDDD-A83008-1EEEA0", "With Pharmacy"),
        ]))
        .await;

    assert_eq!(response, BatchResponse::server_error());
    assert_eq!(h.store.insert_calls(), 0);
}

#[tokio::test]
async fn test_unmatched_batch_in_integration_proceeds() {
    let h = int_harness();
    let response = h
        .pipeline
        .process(request(vec![event("t1", "07A66F-A83008-1EEEA0", "Ready to collect")]))
        .await;

    assert_eq!(response.status, 201);
    assert_eq!(h.queue.call_count(), 1);
}

#[tokio::test]
async fn test_conflict_is_logged_below_error() {
    let capture = init_test_capture();
    let h = harness();
    let events = || vec![event("t1", "07A66F-A83008-1EEEA0", "With Pharmacy")];

    h.pipeline.process(request_with_id("req-conflict", events())).await;
    let response = h.pipeline.process(request_with_id("req-conflict", events())).await;
    assert_eq!(response.status, 409);

    let logged = capture.events_with("request_id", "req-conflict");
    assert!(logged
        .iter()
        .any(|e| e.message.as_deref() == Some("Batch rejected: records already exist")));
    assert!(logged.iter().all(|e| e.level != Level::ERROR));
}

#[tokio::test]
async fn test_store_failure_is_logged_with_request_id() {
    let capture = init_test_capture();
    let h = harness();
    h.store.fail_writes("store unavailable");

    let response = h
        .pipeline
        .process(request_with_id(
            "req-store-failure",
            vec![event("t1", "07A66F-A83008-1EEEA0", "With Pharmacy")],
        ))
        .await;
    assert_eq!(response, BatchResponse::server_error());

    let errors: Vec<_> = capture
        .events_with("request_id", "req-store-failure")
        .into_iter()
        .filter(|e| e.level == Level::ERROR)
        .collect();
    assert!(errors
        .iter()
        .any(|e| e.op.as_deref() == Some("commit_batch")
            && e.event.as_deref() == Some(EVENT_END_ERROR)));
    assert!(errors
        .iter()
        .any(|e| e.message.as_deref() == Some("Batch commit failed")));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_logged_with_request_id() {
    let capture = init_test_capture();
    let h = harness();
    h.store.delay_writes(Duration::from_secs(20));

    let response = h
        .pipeline
        .process(request_with_id(
            "req-timeout",
            vec![event("t1", "07A66F-A83008-1EEEA0", "Ready to collect")],
        ))
        .await;
    assert_eq!(response.status, 504);

    let errors: Vec<_> = capture
        .events_with("request_id", "req-timeout")
        .into_iter()
        .filter(|e| e.level == Level::ERROR)
        .collect();
    assert!(errors
        .iter()
        .any(|e| e.message.as_deref() == Some("Store write timed out; it may still complete")));
    assert!(errors
        .iter()
        .any(|e| e.message.as_deref() == Some("Batch commit timed out")));
}
