//! Model-checking harness for datastore operations.
//!
//! Operations are applied both to a datastore and to a plain map. Strong
//! reads must always agree with the map, and every write must report a
//! version strictly above the previous version of the same entity.

use crate::fixtures::{TestDatastore, TEST_APP};
use crate::generators::EntityOperation;
use egstore_core::Datastore;
use egstore_storage::{Entity, Key, PropertyValue};
use std::collections::HashMap;

/// Property written by the harness.
pub const VALUE_PROPERTY: &str = "value";

/// A datastore paired with the state it is expected to hold.
#[derive(Debug)]
pub struct IntegrationHarness {
    /// The datastore under test.
    pub ds: TestDatastore,
    entities: HashMap<Key, i64>,
    versions: HashMap<Key, u64>,
}

impl IntegrationHarness {
    /// Creates a harness over a master/slave datastore.
    pub fn new() -> Self {
        Self::with_datastore(TestDatastore::master_slave())
    }

    /// Creates a harness over `ds`.
    pub fn with_datastore(ds: TestDatastore) -> Self {
        Self {
            ds,
            entities: HashMap::new(),
            versions: HashMap::new(),
        }
    }

    /// Applies one operation to the datastore and the model.
    pub fn apply(&mut self, op: &EntityOperation) {
        match op {
            EntityOperation::Put { key, value } => self.put(key.clone(), *value),
            EntityOperation::Delete { key } => self.delete(key),
            EntityOperation::Get { key } => {
                self.get_and_verify(key);
            }
        }
    }

    /// Puts an entity and tracks it.
    pub fn put(&mut self, key: Key, value: i64) {
        let entity = Entity::new(key.clone()).with(VALUE_PROPERTY, value);
        let mutation = self
            .ds
            .put(vec![entity], None, &self.ds.caller)
            .expect("Failed to put entity");
        let unchanged = self.entities.get(&key) == Some(&value);
        let version = mutation.versions[0].expect("put reports a version");
        self.check_version(&key, version, unchanged);
        self.entities.insert(key, value);
    }

    /// Deletes an entity and updates tracking.
    pub fn delete(&mut self, key: &Key) {
        self.ds
            .delete(std::slice::from_ref(key), None, &self.ds.caller)
            .expect("Failed to delete entity");
        self.entities.remove(key);
    }

    /// Reads an entity and verifies it matches the model.
    pub fn get_and_verify(&self, key: &Key) -> Option<i64> {
        let lookups = self
            .ds
            .get(std::slice::from_ref(key), None, false, &self.ds.caller)
            .expect("Failed to get entity");
        let actual = value_of(lookups[0].entity.as_ref());
        assert_eq!(
            actual,
            self.entities.get(key).copied(),
            "Entity mismatch for {key}"
        );
        if let (Some(_), Some(version)) = (actual, lookups[0].version) {
            assert_eq!(
                self.versions.get(key),
                Some(&version),
                "Version mismatch for {key}"
            );
        }
        actual
    }

    /// Verifies every tracked entity with a single batched read.
    pub fn verify_all(&self) {
        let keys: Vec<Key> = self.entities.keys().cloned().collect();
        let lookups = self
            .ds
            .get(&keys, None, false, &self.ds.caller)
            .expect("Failed to get entities");
        for (key, lookup) in keys.iter().zip(&lookups) {
            assert_eq!(
                value_of(lookup.entity.as_ref()),
                self.entities.get(key).copied(),
                "Entity mismatch for {key}"
            );
        }
    }

    /// Returns the count of tracked entities.
    pub fn tracked_count(&self) -> usize {
        self.entities.len()
    }

    fn check_version(&mut self, key: &Key, version: u64, unchanged: bool) {
        if let Some(&previous) = self.versions.get(key) {
            if unchanged {
                assert_eq!(version, previous, "no-op put changed the version of {key}");
            } else {
                assert!(
                    version > previous,
                    "version of {key} went from {previous} to {version}"
                );
            }
        }
        self.versions.insert(key.clone(), version);
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn value_of(entity: Option<&Entity>) -> Option<i64> {
    entity
        .and_then(|e| e.get(VALUE_PROPERTY))
        .and_then(PropertyValue::as_integer)
}

/// Transaction checks shared by the integration tests.
pub mod transaction {
    use super::*;
    use egstore_core::{Caller, CoreError};

    /// Writes inside an open transaction stay invisible to other readers.
    pub fn test_transaction_isolation(ds: &Datastore, caller: &Caller) {
        let key = Key::with_id(TEST_APP, "Isolated", 1);
        ds.put(vec![Entity::new(key.clone()).with(VALUE_PROPERTY, 1)], None, caller)
            .expect("Failed to put");

        let handle = ds
            .begin_transaction(TEST_APP, false, caller)
            .expect("Failed to begin");
        ds.put(
            vec![Entity::new(key.clone()).with(VALUE_PROPERTY, 2)],
            Some(&handle),
            caller,
        )
        .expect("Failed to put in transaction");

        let outside = ds.get(std::slice::from_ref(&key), None, false, caller).expect("get");
        assert_eq!(value_of(outside[0].entity.as_ref()), Some(1));

        ds.commit(&handle, caller).expect("Failed to commit");
        let after = ds.get(std::slice::from_ref(&key), None, false, caller).expect("get");
        assert_eq!(value_of(after[0].entity.as_ref()), Some(2));
    }

    /// Two transactions that read and write the same group: the second
    /// commit fails with a retryable conflict.
    pub fn test_conflict_detection(ds: &Datastore, caller: &Caller) {
        let key = Key::with_id(TEST_APP, "Contended", 1);
        ds.put(vec![Entity::new(key.clone()).with(VALUE_PROPERTY, 0)], None, caller)
            .expect("Failed to put");

        let first = ds.begin_transaction(TEST_APP, false, caller).expect("begin");
        let second = ds.begin_transaction(TEST_APP, false, caller).expect("begin");
        for handle in [&first, &second] {
            ds.get(std::slice::from_ref(&key), Some(handle), false, caller)
                .expect("read in transaction");
            ds.put(
                vec![Entity::new(key.clone()).with(VALUE_PROPERTY, 1)],
                Some(handle),
                caller,
            )
            .expect("write in transaction");
        }

        ds.commit(&first, caller).expect("first commit wins");
        let err = ds.commit(&second, caller).expect_err("second commit conflicts");
        assert!(matches!(err, CoreError::ConcurrentTransaction { .. }));
        assert!(err.is_retryable());
    }

    /// Transactions on different entity groups never conflict.
    pub fn test_disjoint_groups(ds: &Datastore, caller: &Caller) {
        let a = Key::with_id(TEST_APP, "Disjoint", 1);
        let b = Key::with_id(TEST_APP, "Disjoint", 2);
        let first = ds.begin_transaction(TEST_APP, false, caller).expect("begin");
        let second = ds.begin_transaction(TEST_APP, false, caller).expect("begin");
        for (handle, key) in [(&first, &a), (&second, &b)] {
            ds.get(std::slice::from_ref(key), Some(handle), false, caller)
                .expect("read in transaction");
            ds.put(vec![Entity::new(key.clone())], Some(handle), caller)
                .expect("write in transaction");
        }
        ds.commit(&second, caller).expect("commit");
        ds.commit(&first, caller).expect("commit");
    }
}
