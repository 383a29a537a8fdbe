//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small id space so that generated operations
//! collide on the same entities and entity groups.

use crate::fixtures::TEST_APP;
use egstore_storage::{Entity, Key, PropertyValue};
use proptest::prelude::*;

/// Strategy for root keys of kind `kind` with ids in `1..=max_id`.
pub fn root_key_strategy(kind: &'static str, max_id: i64) -> impl Strategy<Value = Key> {
    (1..=max_id).prop_map(move |id| Key::with_id(TEST_APP, kind, id))
}

/// Strategy for keys that are either a group root or a child of one.
pub fn key_strategy(max_id: i64) -> impl Strategy<Value = Key> {
    prop_oneof![
        2 => root_key_strategy("Item", max_id),
        1 => (root_key_strategy("Item", max_id), 1..=max_id)
            .prop_map(|(parent, id)| parent.child("Part", id)),
    ]
}

/// Strategy for indexable property values.
pub fn property_value_strategy() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        Just(PropertyValue::Null),
        any::<i64>().prop_map(PropertyValue::Integer),
        any::<bool>().prop_map(PropertyValue::Boolean),
        "[a-z]{0,12}".prop_map(PropertyValue::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(PropertyValue::Bytes),
        (-1.0e6..1.0e6f64).prop_map(PropertyValue::Double),
    ]
}

/// Strategy for property names.
pub fn property_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for entities with up to four properties.
pub fn entity_strategy(max_id: i64) -> impl Strategy<Value = Entity> {
    (
        key_strategy(max_id),
        prop::collection::vec((property_name_strategy(), property_value_strategy()), 0..4),
    )
        .prop_map(|(key, properties)| {
            properties
                .into_iter()
                .fold(Entity::new(key), |entity, (name, value)| entity.with(name, value))
        })
}

/// A datastore operation on one key.
#[derive(Debug, Clone)]
pub enum EntityOperation {
    /// Put an entity with a single `value` property
    Put {
        /// Entity key
        key: Key,
        /// Stored value
        value: i64,
    },
    /// Delete an entity
    Delete {
        /// Entity key
        key: Key,
    },
    /// Get an entity
    Get {
        /// Entity key
        key: Key,
    },
}

impl EntityOperation {
    /// The key the operation touches.
    #[must_use]
    pub fn key(&self) -> &Key {
        match self {
            Self::Put { key, .. } | Self::Delete { key } | Self::Get { key } => key,
        }
    }
}

/// Strategy for generating entity operations.
pub fn entity_operation_strategy(max_id: i64) -> impl Strategy<Value = EntityOperation> {
    prop_oneof![
        3 => (key_strategy(max_id), -100..100i64)
            .prop_map(|(key, value)| EntityOperation::Put { key, value }),
        1 => key_strategy(max_id).prop_map(|key| EntityOperation::Delete { key }),
        2 => key_strategy(max_id).prop_map(|key| EntityOperation::Get { key }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<EntityOperation>> {
    prop::collection::vec(entity_operation_strategy(4), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
