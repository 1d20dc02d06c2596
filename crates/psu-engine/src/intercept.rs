//! Test-interception harness
//!
//! In the integration environment, batches that contain known synthetic
//! prescription ids are steered into specific failure modes so client
//! retry handling can be exercised end to end. The policy is chosen once at
//! startup; everywhere else [`NoInterception`] is installed and the harness
//! costs nothing.
//!
//! | Set | First sighting                  | Later sighting                  |
//! |-----|---------------------------------|---------------------------------|
//! | A   | commit, then 500, no notify     | on conflict 201, no notify      |
//! | B   | commit, then 500, no notify     | natural flow (409 on replay)    |
//! | C   | 400, nothing persisted          | same                            |
//! | D   | 429, nothing persisted          | same                            |

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use psu_core::errors::{ExError, PsuError, Result};
use psu_core::model::TransitionRecord;
use psu_core::ports::{ParameterSource, TransitionStore};
use tokio::sync::OnceCell;

/// What the harness wants done with a batch
#[derive(Debug, Clone, PartialEq)]
pub enum InterceptDecision {
    /// Normal processing
    Proceed,
    /// Commit normally, then report a server error without notifying
    ForceErrorAfterCommit,
    /// Commit normally; if the commit conflicts report success for every
    /// entry without notifying
    ForceSuccessOnConflict,
    /// Reject with 400 before touching the store
    RejectBadRequest,
    /// Reject with 429 before touching the store
    RejectCapacity,
    /// The batch hit more than one synthetic set
    Misuse(PsuError),
}

#[async_trait]
pub trait InterceptionPolicy: Send + Sync {
    /// Decide how to treat a built, validated batch.
    ///
    /// # Errors
    ///
    /// Returns the store's or parameter source's error when membership
    /// cannot be established.
    async fn inspect(
        &self,
        records: &[TransitionRecord],
        store: &dyn TransitionStore,
    ) -> Result<InterceptDecision>;
}

/// Policy for every environment except integration
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInterception;

#[async_trait]
impl InterceptionPolicy for NoInterception {
    async fn inspect(
        &self,
        _records: &[TransitionRecord],
        _store: &dyn TransitionStore,
    ) -> Result<InterceptDecision> {
        Ok(InterceptDecision::Proceed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyntheticSet {
    A,
    B,
    C,
    D,
}

impl SyntheticSet {
    const ALL: [SyntheticSet; 4] = [SyntheticSet::A, SyntheticSet::B, SyntheticSet::C, SyntheticSet::D];

    fn label(&self) -> &'static str {
        match self {
            SyntheticSet::A => "A",
            SyntheticSet::B => "B",
            SyntheticSet::C => "C",
            SyntheticSet::D => "D",
        }
    }
}

/// Synthetic prescription ids, uppercased to match built records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyntheticSets {
    sets: [HashSet<String>; 4],
}

impl SyntheticSets {
    /// Build from raw comma separated parameter values for A, B, C, D
    pub fn from_values(values: [Option<&str>; 4]) -> Self {
        let sets = values.map(|value| {
            value
                .unwrap_or("")
                .split(',')
                .map(|id| id.trim().to_uppercase())
                .filter(|id| !id.is_empty())
                .collect::<HashSet<_>>()
        });
        Self { sets }
    }

    fn set(&self, which: SyntheticSet) -> &HashSet<String> {
        &self.sets[which as usize]
    }

    /// Pairs of sets that share at least one id
    pub fn overlaps(&self) -> Vec<(&'static str, &'static str)> {
        let mut pairs = Vec::new();
        for (i, left) in SyntheticSet::ALL.iter().enumerate() {
            for right in &SyntheticSet::ALL[i + 1..] {
                if !self.set(*left).is_disjoint(self.set(*right)) {
                    pairs.push((left.label(), right.label()));
                }
            }
        }
        pairs
    }

    /// First record of the batch whose prescription id is in each set
    fn matches<'a>(&self, records: &'a [TransitionRecord]) -> Vec<(SyntheticSet, &'a TransitionRecord)> {
        SyntheticSet::ALL
            .iter()
            .filter_map(|which| {
                records
                    .iter()
                    .find(|r| self.set(*which).contains(&r.prescription_id))
                    .map(|r| (*which, r))
            })
            .collect()
    }
}

/// Integration-environment policy backed by four parameters
pub struct SyntheticInterception {
    parameters: Arc<dyn ParameterSource>,
    param_names: [String; 4],
    sets: OnceCell<SyntheticSets>,
}

impl SyntheticInterception {
    pub fn new(parameters: Arc<dyn ParameterSource>, param_names: [String; 4]) -> Self {
        Self {
            parameters,
            param_names,
            sets: OnceCell::new(),
        }
    }

    /// Use fixed sets instead of fetching them
    pub fn with_sets(parameters: Arc<dyn ParameterSource>, sets: SyntheticSets) -> Self {
        Self {
            parameters,
            param_names: Default::default(),
            sets: OnceCell::new_with(Some(sets)),
        }
    }

    async fn sets(&self) -> Result<&SyntheticSets> {
        self.sets
            .get_or_try_init(|| async {
                let values = self.parameters.get_parameters(&self.param_names).await?;
                let sets = SyntheticSets::from_values(std::array::from_fn(|i| {
                    values.get(&self.param_names[i]).map(String::as_str)
                }));
                for (left, right) in sets.overlaps() {
                    tracing::warn!(
                        left,
                        right,
                        "Synthetic prescription sets overlap; batches hitting both will be refused"
                    );
                }
                Ok::<_, ExError>(sets)
            })
            .await
    }
}

#[async_trait]
impl InterceptionPolicy for SyntheticInterception {
    async fn inspect(
        &self,
        records: &[TransitionRecord],
        store: &dyn TransitionStore,
    ) -> Result<InterceptDecision> {
        tracing::info!("INT environment detected, checking for test prescription interceptions");
        let sets = self.sets().await?;

        let matches = sets.matches(records);
        let (which, record) = match matches.as_slice() {
            [] => return Ok(InterceptDecision::Proceed),
            [single] => *single,
            many => {
                let err = PsuError::SyntheticSetOverlap {
                    sets: many.iter().map(|(set, _)| set.label().to_string()).collect(),
                };
                tracing::error!(error = %err, "Refusing batch that matches several synthetic sets");
                return Ok(InterceptDecision::Misuse(err));
            }
        };

        let decision = match which {
            SyntheticSet::A => {
                if previously_stored(store, record).await {
                    tracing::info!("Not first submission of INT test prescription 1, forcing 201");
                    InterceptDecision::ForceSuccessOnConflict
                } else {
                    tracing::info!("First submission of INT test prescription 1, returning 500");
                    InterceptDecision::ForceErrorAfterCommit
                }
            }
            SyntheticSet::B => {
                if previously_stored(store, record).await {
                    tracing::info!("Not first submission of INT test prescription 2, continuing");
                    InterceptDecision::Proceed
                } else {
                    tracing::info!("First submission of INT test prescription 2, returning 500");
                    InterceptDecision::ForceErrorAfterCommit
                }
            }
            SyntheticSet::C => {
                tracing::info!(
                    "Forcing error for INT test prescription. Simulating failure to write to database."
                );
                InterceptDecision::RejectBadRequest
            }
            SyntheticSet::D => {
                tracing::info!("Forcing error for INT test prescription. Simulating PSU capacity failure.");
                InterceptDecision::RejectCapacity
            }
        };
        Ok(decision)
    }
}

/// Whether the record was already stored; a failed read counts as a first sighting
async fn previously_stored(store: &dyn TransitionStore, record: &TransitionRecord) -> bool {
    let key = record.key();
    match store.get(&key).await {
        Ok(existing) => existing.is_some(),
        Err(err) => {
            tracing::warn!(
                task_id = %key.task_id,
                prescription_id = %key.prescription_id,
                error = %err,
                "Failed to read test prescription record, treating as first submission"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use psu_core::sources::StaticParameterSource;
    use psu_store::MemoryTransitionStore;

    fn record(task_id: &str, prescription_id: &str) -> TransitionRecord {
        TransitionRecord {
            task_id: task_id.to_string(),
            prescription_id: prescription_id.to_string(),
            line_item_id: "L1".to_string(),
            patient_id: "9449304130".to_string(),
            site_code: "C9Z1O".to_string(),
            application_name: "test-app".to_string(),
            request_id: "req-1".to_string(),
            status: "With Pharmacy".to_string(),
            terminal_status: "in-progress".to_string(),
            last_modified: Utc::now(),
            repeat_number: None,
            expiry_time: 0,
        }
    }

    fn names() -> [String; 4] {
        ["SET_A", "SET_B", "SET_C", "SET_D"].map(str::to_string)
    }

    fn policy(source: StaticParameterSource) -> SyntheticInterception {
        SyntheticInterception::new(Arc::new(source), names())
    }

    fn source() -> StaticParameterSource {
        StaticParameterSource::new()
            .with("SET_A", "aaa-1, AAA-2")
            .with("SET_B", "BBB-1")
            .with("SET_C", "CCC-1")
            .with("SET_D", "DDD-1,")
    }

    #[test]
    fn test_sets_trim_uppercase_and_drop_blanks() {
        let sets = SyntheticSets::from_values([Some(" aaa-1 , ,AAA-2"), None, Some(""), Some("x")]);
        assert_eq!(sets.set(SyntheticSet::A).len(), 2);
        assert!(sets.set(SyntheticSet::A).contains("AAA-1"));
        assert!(sets.set(SyntheticSet::B).is_empty());
        assert!(sets.overlaps().is_empty());
    }

    #[test]
    fn test_overlaps_are_reported_per_pair() {
        let sets = SyntheticSets::from_values([Some("X"), Some("X"), Some("Y"), Some("Y")]);
        assert_eq!(sets.overlaps(), vec![("A", "B"), ("C", "D")]);
    }

    #[tokio::test]
    async fn test_no_match_proceeds() {
        let store = MemoryTransitionStore::new();
        let decision = policy(source())
            .inspect(&[record("t1", "OTHER")], &store)
            .await
            .unwrap();
        assert_eq!(decision, InterceptDecision::Proceed);
    }

    #[tokio::test]
    async fn test_set_a_first_and_later_sighting() {
        let store = MemoryTransitionStore::new();
        let policy = policy(source());
        let batch = [record("t0", "OTHER"), record("t1", "AAA-2")];

        assert_eq!(
            policy.inspect(&batch, &store).await.unwrap(),
            InterceptDecision::ForceErrorAfterCommit
        );

        store.seed([record("t1", "AAA-2")]);
        assert_eq!(
            policy.inspect(&batch, &store).await.unwrap(),
            InterceptDecision::ForceSuccessOnConflict
        );
    }

    #[tokio::test]
    async fn test_set_b_first_and_later_sighting() {
        let store = MemoryTransitionStore::new();
        let policy = policy(source());
        let batch = [record("t1", "BBB-1")];

        assert_eq!(
            policy.inspect(&batch, &store).await.unwrap(),
            InterceptDecision::ForceErrorAfterCommit
        );
        store.seed([record("t1", "BBB-1")]);
        assert_eq!(policy.inspect(&batch, &store).await.unwrap(), InterceptDecision::Proceed);
    }

    #[tokio::test]
    async fn test_read_failure_counts_as_first_sighting() {
        let store = MemoryTransitionStore::new();
        store.seed([record("t1", "AAA-1"), record("t2", "BBB-1")]);
        store.fail_reads("table unavailable");
        let policy = policy(source());

        assert_eq!(
            policy.inspect(&[record("t1", "AAA-1")], &store).await.unwrap(),
            InterceptDecision::ForceErrorAfterCommit
        );
        assert_eq!(
            policy.inspect(&[record("t2", "BBB-1")], &store).await.unwrap(),
            InterceptDecision::ForceErrorAfterCommit
        );
    }

    #[tokio::test]
    async fn test_sets_c_and_d_reject() {
        let store = MemoryTransitionStore::new();
        let policy = policy(source());
        assert_eq!(
            policy.inspect(&[record("t1", "CCC-1")], &store).await.unwrap(),
            InterceptDecision::RejectBadRequest
        );
        assert_eq!(
            policy.inspect(&[record("t1", "DDD-1")], &store).await.unwrap(),
            InterceptDecision::RejectCapacity
        );
    }

    #[tokio::test]
    async fn test_batch_matching_two_sets_is_misuse() {
        let store = MemoryTransitionStore::new();
        let decision = policy(source())
            .inspect(&[record("t1", "CCC-1"), record("t2", "AAA-1")], &store)
            .await
            .unwrap();
        assert_eq!(
            decision,
            InterceptDecision::Misuse(PsuError::SyntheticSetOverlap {
                sets: vec!["A".to_string(), "C".to_string()]
            })
        );
    }

    #[tokio::test]
    async fn test_sets_are_loaded_once() {
        let store = MemoryTransitionStore::new();
        let source = Arc::new(source());
        let policy = SyntheticInterception::new(source.clone(), names());

        policy.inspect(&[record("t1", "X")], &store).await.unwrap();
        policy.inspect(&[record("t2", "X")], &store).await.unwrap();
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_load_failure_is_retried() {
        let store = MemoryTransitionStore::new();
        let source = Arc::new(StaticParameterSource::new());
        source.fail_with("throttled");
        let policy = SyntheticInterception::new(source.clone(), names());

        assert!(policy.inspect(&[record("t1", "X")], &store).await.is_err());
        assert!(policy.inspect(&[record("t1", "X")], &store).await.is_err());
        assert_eq!(source.call_count(), 2);
    }
}
