//! Entities, property values and stored records.

use crate::key::Key;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single property value.
///
/// Values of different types order by type rank:
/// `Null < Integer < Boolean < Text < Bytes < Double < Key`.
/// Doubles compare with IEEE total ordering so that `Eq` and `Ord` agree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Explicit null.
    Null,
    /// Signed 64-bit integer.
    Integer(i64),
    /// Boolean.
    Boolean(bool),
    /// UTF-8 text.
    Text(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// 64-bit float.
    Double(f64),
    /// Reference to another entity.
    Key(Key),
}

impl PropertyValue {
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Integer(_) => 1,
            Self::Boolean(_) => 2,
            Self::Text(_) => 3,
            Self::Bytes(_) => 4,
            Self::Double(_) => 5,
            Self::Key(_) => 6,
        }
    }

    /// Returns the integer payload, if this is an integer.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text payload, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PropertyValue {}

impl PartialOrd for PropertyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PropertyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b),
            (Self::Key(a), Self::Key(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<Key> for PropertyValue {
    fn from(v: Key) -> Self {
        Self::Key(v)
    }
}

/// A named property. Repeating a name makes the property multi-valued.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Property value.
    pub value: PropertyValue,
    /// Whether the value appears in indexes. Unindexed values cannot be
    /// filtered or sorted on.
    pub indexed: bool,
}

impl Property {
    /// Creates an indexed property.
    pub fn new(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            indexed: true,
        }
    }

    /// Creates an unindexed property.
    pub fn unindexed(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            indexed: false,
        }
    }
}

/// An entity: a key and its properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// The entity key.
    pub key: Key,
    /// Properties in insertion order.
    pub properties: Vec<Property>,
}

impl Entity {
    /// Creates an entity without properties.
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: Vec::new(),
        }
    }

    /// Adds an indexed property value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.push(Property::new(name, value));
        self
    }

    /// Adds an unindexed property value.
    #[must_use]
    pub fn with_unindexed(
        mut self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.properties.push(Property::unindexed(name, value));
        self
    }

    /// Replaces every value of `name` with a single indexed value.
    pub fn set(&mut self, name: &str, value: impl Into<PropertyValue>) {
        self.properties.retain(|p| p.name != name);
        self.properties.push(Property::new(name, value));
    }

    /// Returns the first value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// Iterates over all values of `name`, indexed or not.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a PropertyValue> + 'a {
        self.properties
            .iter()
            .filter(move |p| p.name == name)
            .map(|p| &p.value)
    }

    /// Iterates over the indexed values of `name`.
    pub fn indexed_values<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a PropertyValue> + 'a {
        self.properties
            .iter()
            .filter(move |p| p.indexed && p.name == name)
            .map(|p| &p.value)
    }
}

/// Metadata stored beside an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Commit timestamp of the last write, once known.
    pub updated_version: Option<u64>,
}

/// An entity paired with its metadata.
///
/// Records are values: whoever holds one owns it, and they are cloned
/// whenever they cross a transaction boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// The stored entity.
    pub entity: Entity,
    /// Version metadata.
    pub metadata: EntityMetadata,
}

impl EntityRecord {
    /// Creates a record with no version.
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            metadata: EntityMetadata::default(),
        }
    }

    /// Creates a record with a known version.
    pub fn with_version(entity: Entity, version: u64) -> Self {
        Self {
            entity,
            metadata: EntityMetadata {
                updated_version: Some(version),
            },
        }
    }

    /// Returns the record's key.
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.entity.key
    }

    /// Returns the record's version, if any.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.metadata.updated_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn type_rank_order() {
        let ordered = [
            PropertyValue::Null,
            PropertyValue::Integer(i64::MAX),
            PropertyValue::Boolean(false),
            PropertyValue::Text(String::new()),
            PropertyValue::Bytes(vec![]),
            PropertyValue::Double(f64::NEG_INFINITY),
            PropertyValue::Key(Key::with_id("a", "K", 1)),
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{:?} < {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn doubles_are_totally_ordered() {
        let nan = PropertyValue::Double(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert!(PropertyValue::Double(1.0) < nan);
    }

    #[test]
    fn set_replaces_all_values() {
        let key = Key::with_id("app", "K", 1);
        let mut entity = Entity::new(key).with("tag", "a").with("tag", "b");
        assert_eq!(entity.values("tag").count(), 2);
        entity.set("tag", "c");
        assert_eq!(entity.values("tag").collect::<Vec<_>>(), vec![&PropertyValue::from("c")]);
    }

    #[test]
    fn unindexed_values_are_hidden_from_indexes() {
        let entity = Entity::new(Key::with_id("app", "K", 1))
            .with("a", 1)
            .with_unindexed("a", 2);
        assert_eq!(entity.values("a").count(), 2);
        assert_eq!(entity.indexed_values("a").count(), 1);
    }

    proptest! {
        #[test]
        fn integer_order_matches_value_order(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(
                PropertyValue::Integer(a).cmp(&PropertyValue::Integer(b)),
                a.cmp(&b)
            );
        }
    }
}
