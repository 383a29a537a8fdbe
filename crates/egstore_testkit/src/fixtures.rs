//! Test fixtures and datastore helpers.
//!
//! Every fixture runs on a [`ManualClock`] so that time-based consistency
//! can be stepped deterministically, and retries never sleep.

use egstore_core::{
    ActionSink, Caller, Config, ConsistencyPolicy, Datastore, DiscardActions, ManualClock,
    RetryConfig,
};
use egstore_storage::{Entity, InMemoryBackend, Key, PropertyValue};
use std::sync::Arc;

/// App id used by the fixtures.
pub const TEST_APP: &str = "test-app";

/// Kind of the counter entities written by the helpers.
pub const COUNTER_KIND: &str = "Counter";

/// Property holding a counter's value.
pub const COUNT_PROPERTY: &str = "count";

/// Start reading of the fixture clocks.
pub const START_MS: u64 = 1_000_000;

/// A datastore on an in-memory backend with a manual clock.
#[derive(Debug)]
pub struct TestDatastore {
    /// The datastore instance.
    pub ds: Datastore,
    /// Clock driving commit times and time-based applies.
    pub clock: Arc<ManualClock>,
    /// Caller for [`TEST_APP`].
    pub caller: Caller,
}

impl TestDatastore {
    /// Creates a datastore with `config`, retrying conflicts immediately.
    pub fn with_config(config: Config) -> Self {
        Self::with_sink(config, Arc::new(DiscardActions))
    }

    /// Creates a datastore delivering committed actions to `actions`.
    pub fn with_sink(config: Config, actions: Arc<dyn ActionSink>) -> Self {
        let clock = Arc::new(ManualClock::new(START_MS));
        let ds = Datastore::with_collaborators(
            Arc::new(InMemoryBackend::new()),
            clock.clone(),
            actions,
            config.retry(RetryConfig::immediate(3)),
        );
        Self {
            ds,
            clock,
            caller: Caller::app(TEST_APP),
        }
    }

    /// Creates a master/slave datastore.
    pub fn master_slave() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a high replication datastore with the default time-based curve.
    pub fn high_replication() -> Self {
        Self::with_config(Config::default().consistency(ConsistencyPolicy::time_based()))
    }

    /// Creates a high replication datastore applying with `probability`.
    pub fn pseudo_random(probability: f64, seed: u64) -> Self {
        let policy =
            ConsistencyPolicy::pseudo_random(probability, seed).expect("valid probability");
        Self::with_config(Config::default().consistency(policy))
    }

    /// Key of counter `id`, the root of its own entity group.
    pub fn counter_key(id: i64) -> Key {
        Key::with_id(TEST_APP, COUNTER_KIND, id)
    }

    /// Writes counter `id` with `value` outside any transaction.
    pub fn put_counter(&self, id: i64, value: i64) -> Option<u64> {
        let entity = Entity::new(Self::counter_key(id)).with(COUNT_PROPERTY, value);
        let mutation = self
            .ds
            .put(vec![entity], None, &self.caller)
            .expect("put counter");
        mutation.versions[0]
    }

    /// Reads counter `id` with a strongly consistent lookup.
    pub fn counter(&self, id: i64) -> Option<i64> {
        self.read_counter(id, false)
    }

    /// Reads counter `id` with an eventually consistent lookup.
    pub fn eventual_counter(&self, id: i64) -> Option<i64> {
        self.read_counter(id, true)
    }

    fn read_counter(&self, id: i64, eventual: bool) -> Option<i64> {
        let lookups = self
            .ds
            .get(&[Self::counter_key(id)], None, eventual, &self.caller)
            .expect("get counter");
        lookups[0]
            .entity
            .as_ref()
            .and_then(|e| e.get(COUNT_PROPERTY))
            .and_then(PropertyValue::as_integer)
    }
}

impl std::ops::Deref for TestDatastore {
    type Target = Datastore;

    fn deref(&self) -> &Self::Target {
        &self.ds
    }
}

/// Runs a test with a master/slave datastore.
///
/// # Example
///
/// ```rust
/// use egstore_testkit::with_datastore;
///
/// with_datastore(|ds| {
///     ds.put_counter(7, 1);
///     assert_eq!(ds.counter(7), Some(1));
/// });
/// ```
pub fn with_datastore<F, R>(f: F) -> R
where
    F: FnOnce(&TestDatastore) -> R,
{
    let ds = TestDatastore::master_slave();
    f(&ds)
}

/// Runs a test with a time-based high replication datastore.
pub fn with_high_replication<F, R>(f: F) -> R
where
    F: FnOnce(&TestDatastore) -> R,
{
    let ds = TestDatastore::high_replication();
    f(&ds)
}

/// Common test scenarios.
pub mod scenarios {
    use super::*;

    /// Writes counters `1..=count`, each starting at zero.
    pub fn populate_counters(ds: &TestDatastore, count: i64) {
        let entities = (1..=count)
            .map(|id| Entity::new(TestDatastore::counter_key(id)).with(COUNT_PROPERTY, 0))
            .collect();
        ds.ds
            .put(entities, None, &ds.caller)
            .expect("populate counters");
    }

    /// Increments counter `id` in its own transaction.
    ///
    /// # Errors
    ///
    /// Returns the conflict once the datastore gives up retrying.
    pub fn increment_counter(
        ds: &Datastore,
        caller: &Caller,
        id: i64,
    ) -> egstore_core::CoreResult<i64> {
        let key = TestDatastore::counter_key(id);
        ds.run_in_transaction(TEST_APP, false, caller, |ds, handle| {
            let lookups = ds.get(std::slice::from_ref(&key), Some(handle), false, caller)?;
            let current = lookups[0]
                .entity
                .as_ref()
                .and_then(|e| e.get(COUNT_PROPERTY))
                .and_then(PropertyValue::as_integer)
                .unwrap_or(0);
            let next = current + 1;
            ds.put(
                vec![Entity::new(key.clone()).with(COUNT_PROPERTY, next)],
                Some(handle),
                caller,
            )?;
            Ok(next)
        })
    }

    /// Writes a parent and two children in one entity group.
    pub fn family(ds: &TestDatastore, parent_id: i64) -> (Key, Vec<Key>) {
        let parent = Key::with_id(TEST_APP, "Parent", parent_id);
        let children = vec![parent.child("Child", 1), parent.child("Child", 2)];
        let mut entities = vec![Entity::new(parent.clone()).with("name", "parent")];
        entities.extend(
            children
                .iter()
                .enumerate()
                .map(|(i, key)| Entity::new(key.clone()).with("rank", i as i64)),
        );
        ds.ds.put(entities, None, &ds.caller).expect("put family");
        (parent, children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_slave_reads_own_writes() {
        let ds = TestDatastore::master_slave();
        assert!(ds.put_counter(1, 3).is_some());
        assert_eq!(ds.counter(1), Some(3));
        assert_eq!(ds.eventual_counter(1), Some(3));
    }

    #[test]
    fn test_with_datastore() {
        let value = with_datastore(|ds| {
            ds.put_counter(1, 9);
            ds.counter(1)
        });
        assert_eq!(value, Some(9));
    }

    #[test]
    fn test_increment_scenario() {
        let ds = TestDatastore::master_slave();
        scenarios::populate_counters(&ds, 2);
        assert_eq!(scenarios::increment_counter(&ds, &ds.caller, 1).unwrap(), 1);
        assert_eq!(scenarios::increment_counter(&ds, &ds.caller, 1).unwrap(), 2);
        assert_eq!(ds.counter(2), Some(0));
        assert_eq!(ds.counter(1), Some(2));
    }

    #[test]
    fn test_family_shares_a_group() {
        let ds = TestDatastore::master_slave();
        let (parent, children) = scenarios::family(&ds, 4);
        for child in &children {
            assert_eq!(
                child.entity_group().unwrap(),
                parent.entity_group().unwrap()
            );
        }
    }
}
