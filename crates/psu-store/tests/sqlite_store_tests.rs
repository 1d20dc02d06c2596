//! SQLite store through the async port

use chrono::{DateTime, Utc};
use psu_core::model::{RecordKey, TransitionRecord, WriteOutcome};
use psu_core::ports::TransitionStore;
use psu_store::db::open_shared;
use psu_store::SqliteTransitionStore;
use tempfile::TempDir;

fn record(task_id: &str, prescription_id: &str) -> TransitionRecord {
    TransitionRecord {
        task_id: task_id.to_string(),
        prescription_id: prescription_id.to_string(),
        line_item_id: "LINE-1".to_string(),
        patient_id: "9449304130".to_string(),
        site_code: "C9Z1O".to_string(),
        application_name: "test-app".to_string(),
        request_id: "req-1".to_string(),
        status: "Ready to collect".to_string(),
        terminal_status: "in-progress".to_string(),
        last_modified: DateTime::parse_from_rfc3339("2023-09-11T10:11:12Z")
            .unwrap()
            .with_timezone(&Utc),
        repeat_number: None,
        expiry_time: 4_102_444_800,
    }
}

fn store(dir: &TempDir) -> SqliteTransitionStore {
    SqliteTransitionStore::new(open_shared(dir.path().join("psu.db")).unwrap())
}

#[tokio::test]
async fn test_batch_is_written_atomically() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    let outcome = store
        .insert_batch_if_absent(vec![record("t1", "P1"), record("t2", "P1")])
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Written);

    assert!(store.get(&RecordKey::new("t1", "P1")).await.unwrap().is_some());
    assert!(store.get(&RecordKey::new("t2", "P1")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_conflict_rolls_back_and_names_every_violating_key() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    store
        .insert_batch_if_absent(vec![record("t1", "P1"), record("t3", "P2")])
        .await
        .unwrap();

    let outcome = store
        .insert_batch_if_absent(vec![record("t1", "P1"), record("t2", "P1"), record("t3", "P2")])
        .await
        .unwrap();

    assert_eq!(
        outcome,
        WriteOutcome::Rejected {
            conflicts: vec![RecordKey::new("t1", "P1"), RecordKey::new("t3", "P2")]
        }
    );
    assert!(store.get(&RecordKey::new("t2", "P1")).await.unwrap().is_none());
    assert_eq!(store.count_sync().unwrap(), 2);
}

#[tokio::test]
async fn test_same_task_under_another_prescription_is_distinct() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    store
        .insert_batch_if_absent(vec![record("t1", "P1")])
        .await
        .unwrap();

    let outcome = store
        .insert_batch_if_absent(vec![record("t1", "P2")])
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Written);
}

#[tokio::test]
async fn test_delete_then_reinsert() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let key = RecordKey::new("t1", "P1");
    store
        .insert_batch_if_absent(vec![record("t1", "P1")])
        .await
        .unwrap();

    assert!(store.delete(&key).await.unwrap());
    let outcome = store
        .insert_batch_if_absent(vec![record("t1", "P1")])
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Written);
}
