//! Consistency policies.
//!
//! A policy decides when a committed transaction is applied to the backend
//! and therefore becomes visible to non-transactional readers:
//!
//! - [`ConsistencyPolicy::MasterSlave`] applies every commit before `commit`
//!   returns. Readers always observe the latest commit.
//! - [`ConsistencyPolicy::HighReplication`] leaves commits queued and applies
//!   them during grooming, head first, once an [`ApplyPredicate`] says the
//!   simulated replication delay is over.
//!
//! Transactional reads are unaffected: snapshots always catch the group up.

use crate::error::{CoreError, CoreResult};
use crate::transaction::{CommittedTxn, EntityGroupMetaData, ManagerCore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::debug;

/// Default `(probability, delay_ms)` buckets of [`TimeBasedPolicy`].
pub const DEFAULT_CLASSIFICATION_MAP: [(f64, u64); 4] =
    [(0.98, 100), (0.99, 300), (0.995, 2000), (1.0, 240_000)];

/// When committed transactions become visible.
#[derive(Debug, Clone)]
pub enum ConsistencyPolicy {
    /// Apply on commit.
    MasterSlave,
    /// Apply lazily, when the predicate allows it.
    HighReplication(ApplyPredicate),
}

impl Default for ConsistencyPolicy {
    fn default() -> Self {
        Self::MasterSlave
    }
}

impl ConsistencyPolicy {
    /// High replication with the default time-based delay curve.
    #[must_use]
    pub fn time_based() -> Self {
        Self::HighReplication(ApplyPredicate::TimeBased(TimeBasedPolicy::default()))
    }

    /// High replication with a reproducible coin flip per apply attempt.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if `probability` is outside `[0, 1]`.
    pub fn pseudo_random(probability: f64, seed: u64) -> CoreResult<Self> {
        Ok(Self::HighReplication(ApplyPredicate::PseudoRandom(
            PseudoRandomPolicy::new(probability, seed)?,
        )))
    }

    /// Returns true for the master/slave policy.
    #[must_use]
    pub fn is_master_slave(&self) -> bool {
        matches!(self, Self::MasterSlave)
    }

    /// Called after a transaction committed on `groups`.
    pub(crate) fn on_commit(
        &self,
        groups: &[Arc<EntityGroupMetaData>],
        core: &ManagerCore,
    ) -> CoreResult<()> {
        if let Self::MasterSlave = self {
            for meta in groups {
                meta.lock()
                    .catch_up(core.backend.as_ref(), &core.stats)?;
            }
        }
        Ok(())
    }

    /// Called before global reads. Applies whatever the predicate allows.
    pub(crate) fn on_groom(
        &mut self,
        groups: &[Arc<EntityGroupMetaData>],
        core: &ManagerCore,
    ) -> CoreResult<()> {
        let Self::HighReplication(predicate) = self else {
            return Ok(());
        };
        let now_ms = core.clock.now_ms();
        for meta in groups {
            let mut state = meta.lock();
            while let Some(head) = state.head() {
                if !predicate.should_apply(&head, meta, now_ms) {
                    debug!(group = %meta.group(), txn = head.id(), "apply deferred");
                    break;
                }
                head.apply(&mut state, core.backend.as_ref(), &core.stats)?;
            }
        }
        Ok(())
    }
}

/// Decides whether the head of a group's apply queue may be applied.
#[derive(Debug, Clone)]
pub enum ApplyPredicate {
    /// Probability-of-visibility curve over elapsed time.
    TimeBased(TimeBasedPolicy),
    /// Seeded coin flip.
    PseudoRandom(PseudoRandomPolicy),
}

impl ApplyPredicate {
    fn should_apply(&mut self, txn: &CommittedTxn, meta: &EntityGroupMetaData, now_ms: u64) -> bool {
        match self {
            Self::TimeBased(policy) => {
                let elapsed_ms = now_ms.saturating_sub(txn.commit_time_ms());
                policy.should_apply_after(elapsed_ms, TimeBasedPolicy::classify(txn.id(), meta.id()))
            }
            Self::PseudoRandom(policy) => policy.next_decision(),
        }
    }
}

/// Simulates production replication latency.
///
/// Every `(transaction, entity group)` pair draws a fixed classification in
/// `[0, 1)`. The pair becomes eligible once the elapsed time since commit
/// reaches the delay of the first bucket whose probability is at least the
/// classification.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBasedPolicy {
    classification_map: Vec<(f64, u64)>,
}

impl Default for TimeBasedPolicy {
    fn default() -> Self {
        Self {
            classification_map: DEFAULT_CLASSIFICATION_MAP.to_vec(),
        }
    }
}

impl TimeBasedPolicy {
    /// Creates a policy from `(probability, delay_ms)` buckets.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the map is empty, a probability is outside
    /// `[0, 1]` or a delay is zero.
    pub fn with_classification_map(mut map: Vec<(f64, u64)>) -> CoreResult<Self> {
        if map.is_empty()
            || map
                .iter()
                .any(|&(p, delay)| !(0.0..=1.0).contains(&p) || delay == 0)
        {
            return Err(CoreError::bad_request(format!(
                "classification map must be a list of (probability, delay) pairs, found {map:?}"
            )));
        }
        map.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        Ok(Self {
            classification_map: map,
        })
    }

    /// The sorted buckets.
    #[must_use]
    pub fn classification_map(&self) -> &[(f64, u64)] {
        &self.classification_map
    }

    /// Deterministic classification of a transaction on a group.
    #[must_use]
    pub fn classify(txn_id: u64, group_id: u64) -> f64 {
        StdRng::seed_from_u64(txn_id.rotate_left(32) ^ group_id).gen::<f64>()
    }

    /// Whether a pair with `classification` is visible after `elapsed_ms`.
    #[must_use]
    pub fn should_apply_after(&self, elapsed_ms: u64, classification: f64) -> bool {
        let delay = self
            .classification_map
            .iter()
            .find(|(p, _)| classification <= *p)
            .or(self.classification_map.last())
            .map_or(0, |&(_, ms)| ms);
        elapsed_ms >= delay
    }
}

/// Applies each queued transaction with a fixed probability, drawing from a
/// seeded generator so that a run can be replayed exactly.
#[derive(Debug, Clone)]
pub struct PseudoRandomPolicy {
    probability: f64,
    rng: StdRng,
}

impl PseudoRandomPolicy {
    /// Creates a policy.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if `probability` is outside `[0, 1]`.
    pub fn new(probability: f64, seed: u64) -> CoreResult<Self> {
        let mut policy = Self {
            probability: 0.5,
            rng: StdRng::seed_from_u64(seed),
        };
        policy.set_probability(probability)?;
        Ok(policy)
    }

    /// Changes the apply probability.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if `probability` is outside `[0, 1]`.
    pub fn set_probability(&mut self, probability: f64) -> CoreResult<()> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(CoreError::bad_request(format!(
                "probability must be a number between 0 and 1, found {probability}"
            )));
        }
        self.probability = probability;
        Ok(())
    }

    /// Restarts the decision sequence from `seed`.
    pub fn set_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// The apply probability.
    #[must_use]
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Draws the next decision.
    pub fn next_decision(&mut self) -> bool {
        self.rng.gen::<f64>() < self.probability
    }
}

impl Default for PseudoRandomPolicy {
    fn default() -> Self {
        Self {
            probability: 0.5,
            rng: StdRng::seed_from_u64(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_map_is_sorted() {
        let policy = TimeBasedPolicy::default();
        assert_eq!(policy.classification_map(), &DEFAULT_CLASSIFICATION_MAP);
    }

    #[test]
    fn bucket_delay_selection() {
        let policy = TimeBasedPolicy::default();
        assert!(!policy.should_apply_after(99, 0.5));
        assert!(policy.should_apply_after(100, 0.5));
        assert!(!policy.should_apply_after(299, 0.985));
        assert!(policy.should_apply_after(300, 0.985));
        assert!(!policy.should_apply_after(239_999, 0.999));
        assert!(policy.should_apply_after(240_000, 0.999));
    }

    #[test]
    fn nothing_is_visible_before_the_smallest_delay() {
        let policy = TimeBasedPolicy::default();
        for txn in 0..200 {
            let c = TimeBasedPolicy::classify(txn, 7);
            assert!((0.0..1.0).contains(&c));
            assert!(!policy.should_apply_after(99, c));
            assert!(policy.should_apply_after(240_000, c));
        }
    }

    #[test]
    fn classification_is_deterministic() {
        assert_eq!(
            TimeBasedPolicy::classify(12, 34),
            TimeBasedPolicy::classify(12, 34)
        );
    }

    #[test]
    fn pairs_with_equal_xor_classify_independently() {
        assert_ne!(TimeBasedPolicy::classify(1, 1), TimeBasedPolicy::classify(2, 2));
        assert_ne!(TimeBasedPolicy::classify(3, 5), TimeBasedPolicy::classify(5, 3));
    }

    #[test]
    fn invalid_maps_are_rejected() {
        assert!(TimeBasedPolicy::with_classification_map(vec![]).is_err());
        assert!(TimeBasedPolicy::with_classification_map(vec![(1.5, 10)]).is_err());
        assert!(TimeBasedPolicy::with_classification_map(vec![(0.5, 0)]).is_err());
        let policy =
            TimeBasedPolicy::with_classification_map(vec![(1.0, 50), (0.5, 10)]).unwrap();
        assert_eq!(policy.classification_map(), &[(0.5, 10), (1.0, 50)]);
    }

    #[test]
    fn pseudo_random_is_reproducible() {
        let mut a = PseudoRandomPolicy::new(0.5, 42).unwrap();
        let mut b = PseudoRandomPolicy::new(0.5, 42).unwrap();
        let first: Vec<bool> = (0..64).map(|_| a.next_decision()).collect();
        let second: Vec<bool> = (0..64).map(|_| b.next_decision()).collect();
        assert_eq!(first, second);

        a.set_seed(42);
        let replay: Vec<bool> = (0..64).map(|_| a.next_decision()).collect();
        assert_eq!(first, replay);
    }

    #[test]
    fn pseudo_random_extremes() {
        let mut never = PseudoRandomPolicy::new(0.0, 1).unwrap();
        let mut always = PseudoRandomPolicy::new(1.0, 1).unwrap();
        for _ in 0..32 {
            assert!(!never.next_decision());
            assert!(always.next_decision());
        }
        assert!(never.set_probability(-0.1).is_err());
        assert!(ConsistencyPolicy::pseudo_random(2.0, 0).is_err());
    }
}
