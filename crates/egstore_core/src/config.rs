//! Datastore configuration.

use crate::consistency::ConsistencyPolicy;
use std::time::Duration;

/// How ids are assigned to entities put with an incomplete key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoIdPolicy {
    /// Ids come from an increasing counter.
    #[default]
    Sequential,
    /// Ids come from the bit-reversed scattered id space.
    Scattered,
}

/// Retry behaviour of implicit transactions that hit a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Factor applied to the delay after every retry.
    pub multiplier: u32,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 2,
            max_delay: Duration::from_millis(120_000),
        }
    }
}

impl RetryConfig {
    /// Retries without sleeping, for tests and simulations.
    #[must_use]
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            multiplier: 1,
            max_delay: Duration::ZERO,
        }
    }

    /// Returns the delay that follows `delay`.
    #[must_use]
    pub fn next_delay(&self, delay: Duration) -> Duration {
        delay.saturating_mul(self.multiplier).min(self.max_delay)
    }
}

/// Configuration for a [`crate::Datastore`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Active consistency policy.
    pub consistency: ConsistencyPolicy,

    /// Whether queries fail when the composite index they need is not serving.
    pub require_indexes: bool,

    /// Id assignment for incomplete keys.
    pub auto_id_policy: AutoIdPolicy,

    /// Entity group cap of cross-group transactions.
    pub max_entity_groups_per_txn: usize,

    /// Maximum number of actions a transaction may queue.
    pub max_actions_per_txn: usize,

    /// Default page size when a query gives neither count nor limit.
    pub batch_size: usize,

    /// Maximum number of results skipped by one page request.
    pub max_query_offset: usize,

    /// Maximum number of results returned by one page request.
    pub max_results: usize,

    /// Conflict retry behaviour of implicit transactions.
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            consistency: ConsistencyPolicy::MasterSlave,
            require_indexes: false,
            auto_id_policy: AutoIdPolicy::Sequential,
            max_entity_groups_per_txn: 25,
            max_actions_per_txn: 5,
            batch_size: 20,
            max_query_offset: 1000,
            max_results: 300,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the consistency policy.
    #[must_use]
    pub fn consistency(mut self, policy: ConsistencyPolicy) -> Self {
        self.consistency = policy;
        self
    }

    /// Sets whether queries require a serving composite index.
    #[must_use]
    pub const fn require_indexes(mut self, value: bool) -> Self {
        self.require_indexes = value;
        self
    }

    /// Sets the auto id policy.
    #[must_use]
    pub const fn auto_id_policy(mut self, policy: AutoIdPolicy) -> Self {
        self.auto_id_policy = policy;
        self
    }

    /// Sets the entity group cap of cross-group transactions.
    #[must_use]
    pub const fn max_entity_groups_per_txn(mut self, value: usize) -> Self {
        self.max_entity_groups_per_txn = value;
        self
    }

    /// Sets the maximum number of actions per transaction.
    #[must_use]
    pub const fn max_actions_per_txn(mut self, value: usize) -> Self {
        self.max_actions_per_txn = value;
        self
    }

    /// Sets the default page size.
    #[must_use]
    pub const fn batch_size(mut self, value: usize) -> Self {
        self.batch_size = value;
        self
    }

    /// Sets the per-request skip bound.
    #[must_use]
    pub const fn max_query_offset(mut self, value: usize) -> Self {
        self.max_query_offset = value;
        self
    }

    /// Sets the per-request result bound.
    #[must_use]
    pub const fn max_results(mut self, value: usize) -> Self {
        self.max_results = value;
        self
    }

    /// Sets the conflict retry behaviour.
    #[must_use]
    pub const fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.consistency.is_master_slave());
        assert!(!config.require_indexes);
        assert_eq!(config.max_entity_groups_per_txn, 25);
        assert_eq!(config.max_actions_per_txn, 5);
        assert_eq!(config.max_results, 300);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .require_indexes(true)
            .auto_id_policy(AutoIdPolicy::Scattered)
            .max_query_offset(10)
            .retry(RetryConfig::immediate(1));

        assert!(config.require_indexes);
        assert_eq!(config.auto_id_policy, AutoIdPolicy::Scattered);
        assert_eq!(config.max_query_offset, 10);
        assert_eq!(config.retry.initial_delay, Duration::ZERO);
    }

    #[test]
    fn retry_backoff_is_capped() {
        let retry = RetryConfig::default();
        let mut delay = retry.initial_delay;
        let mut delays = Vec::new();
        for _ in 0..3 {
            delays.push(delay);
            delay = retry.next_delay(delay);
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
        assert_eq!(
            retry.next_delay(Duration::from_secs(100)),
            Duration::from_millis(120_000)
        );
    }
}
