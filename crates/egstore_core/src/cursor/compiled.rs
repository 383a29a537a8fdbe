//! Compiled cursors.

use crate::error::{CoreError, CoreResult};
use crate::query::{Sortable, KEY_PROPERTY};
use crate::types::Direction;
use egstore_storage::{Entity, Key, PropertyValue};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeSet;

/// One property value recorded in a cursor position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexValue {
    /// Property name.
    pub property: String,
    /// Value of the property at the position.
    pub value: PropertyValue,
}

/// A resumable position in a query's result list.
///
/// The position holds the sorted-on property values of one result plus,
/// unless the query groups, its key. `before` tells whether the position
/// points just before that result rather than just after it.
/// `before_ascending` is the same flag expressed for an ascending first sort
/// order, so a cursor keeps its meaning when the query is reversed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledCursor {
    /// Key of the result at the position.
    pub key: Option<Key>,
    /// Sorted-on values of the result at the position.
    pub index_values: Vec<IndexValue>,
    /// Whether the position is before the result.
    pub before: bool,
    /// `before`, relative to an ascending first sort order.
    pub before_ascending: Option<bool>,
}

impl CompiledCursor {
    /// Returns true if the cursor points at a position.
    ///
    /// An empty end cursor selects nothing.
    #[must_use]
    pub fn has_position(&self) -> bool {
        self.key.is_some() || !self.index_values.is_empty()
    }

    /// Records the position right after `entity`.
    pub(crate) fn after(
        entity: &Entity,
        properties: &BTreeSet<String>,
        first_direction: Direction,
    ) -> Self {
        let key = properties
            .contains(KEY_PROPERTY)
            .then(|| entity.key.clone());
        let index_values = entity
            .properties
            .iter()
            .filter(|p| p.indexed && properties.contains(&p.name))
            .map(|p| IndexValue {
                property: p.name.clone(),
                value: p.value.clone(),
            })
            .collect();
        Self {
            key,
            index_values,
            before: false,
            before_ascending: Some(first_direction == Direction::Descending),
        }
    }

    /// Fills in whichever of `before` and `before_ascending` is derived.
    ///
    /// A cursor carrying `before_ascending` recomputes `before` for the
    /// query's first sort direction; otherwise `before_ascending` is derived
    /// from `before`.
    #[must_use]
    pub fn normalized(mut self, first_direction: Direction) -> Self {
        let descending = first_direction == Direction::Descending;
        match self.before_ascending {
            Some(before_ascending) => self.before = before_ascending != descending,
            None => self.before_ascending = Some(self.before != descending),
        }
        self
    }

    /// Checks that the cursor holds exactly `properties`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` naming the first extra or missing value.
    pub(crate) fn check_properties(&self, properties: &BTreeSet<String>) -> CoreResult<()> {
        let mut remaining: BTreeSet<&str> = properties.iter().map(String::as_str).collect();
        if self.key.is_some() && !remaining.remove(KEY_PROPERTY) {
            return Err(CoreError::bad_request(format!(
                "Cursor does not match query: extra value {KEY_PROPERTY}"
            )));
        }
        for value in &self.index_values {
            if !remaining.remove(value.property.as_str()) {
                return Err(CoreError::bad_request(format!(
                    "Cursor does not match query: extra value {}",
                    value.property
                )));
            }
        }
        if remaining.is_empty() {
            Ok(())
        } else {
            Err(CoreError::bad_request(format!(
                "Cursor does not match query: missing values for {remaining:?}"
            )))
        }
    }

    /// Encodes the cursor as CBOR.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if serialization fails.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|e| CoreError::codec(format!("cannot encode cursor: {e}")))?;
        Ok(bytes)
    }

    /// Decodes a cursor produced by [`CompiledCursor::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns `Codec` for malformed input.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        ciborium::de::from_reader(bytes)
            .map_err(|e| CoreError::codec(format!("cannot decode cursor: {e}")))
    }
}

impl Sortable for CompiledCursor {
    fn sort_values(&self, name: &str) -> Vec<Cow<'_, PropertyValue>> {
        if name == KEY_PROPERTY {
            return self
                .key
                .iter()
                .map(|key| Cow::Owned(PropertyValue::Key(key.clone())))
                .collect();
        }
        self.index_values
            .iter()
            .filter(|v| v.property == name)
            .map(|v| Cow::Borrowed(&v.value))
            .collect()
    }
}
