//! Composite index management.
//!
//! Composite indexes are declared per app and move through a small state
//! machine while they are built and retired:
//!
//! ```text
//! WRITE_ONLY -> READ_WRITE | DELETED | ERROR
//! READ_WRITE -> DELETED
//! ERROR      -> DELETED
//! DELETED    -> ERROR
//! ```
//!
//! Indexes feed the write-cost model, and with `require_indexes` a query
//! fails unless the composite index it needs is `READ_WRITE`.

mod cache;
mod manager;
mod required;

pub use cache::KindIndexCache;
pub use manager::{IndexChangeListener, IndexManager};
pub use required::{required_index, RequiredIndex};

use crate::types::Direction;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a composite index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexState {
    /// Being built; maintained on writes but not used by queries.
    WriteOnly,
    /// Serving.
    ReadWrite,
    /// Build failed.
    Error,
    /// Retired.
    Deleted,
}

impl IndexState {
    /// Returns true if an index may move from `self` to `next`.
    ///
    /// Staying in the same state is always allowed.
    #[must_use]
    pub fn can_transition_to(self, next: IndexState) -> bool {
        use IndexState::{Deleted, Error, ReadWrite, WriteOnly};
        self == next
            || matches!(
                (self, next),
                (WriteOnly, ReadWrite | Deleted | Error)
                    | (ReadWrite, Deleted)
                    | (Error, Deleted)
                    | (Deleted, Error)
            )
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WriteOnly => "WRITE_ONLY",
            Self::ReadWrite => "READ_WRITE",
            Self::Error => "ERROR",
            Self::Deleted => "DELETED",
        };
        f.write_str(name)
    }
}

/// One property of an index definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexProperty {
    /// Property name.
    pub name: String,
    /// Sort direction.
    pub direction: Direction,
}

impl IndexProperty {
    /// Creates an ascending index property.
    pub fn asc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Ascending,
        }
    }

    /// Creates a descending index property.
    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Descending,
        }
    }
}

/// What a composite index covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Entity kind.
    pub kind: String,
    /// Whether rows are additionally keyed by ancestor.
    pub ancestor: bool,
    /// Indexed properties in order.
    pub properties: Vec<IndexProperty>,
}

impl IndexDefinition {
    /// Creates a definition without ancestor.
    pub fn new(kind: impl Into<String>, properties: Vec<IndexProperty>) -> Self {
        Self {
            kind: kind.into(),
            ancestor: false,
            properties,
        }
    }

    /// Marks the definition as an ancestor index.
    #[must_use]
    pub fn with_ancestor(mut self) -> Self {
        self.ancestor = true;
        self
    }
}

/// A composite index owned by an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeIndex {
    /// Owning app.
    pub app_id: String,
    /// Assigned id; 0 until created.
    pub id: u64,
    /// Index definition. Unique per app.
    pub definition: IndexDefinition,
    /// Lifecycle state.
    pub state: IndexState,
}

impl CompositeIndex {
    /// Creates an index request in `WRITE_ONLY` state with id 0.
    pub fn new(app_id: impl Into<String>, definition: IndexDefinition) -> Self {
        Self {
            app_id: app_id.into(),
            id: 0,
            definition,
            state: IndexState::WriteOnly,
        }
    }

    /// Returns a copy in `state`.
    #[must_use]
    pub fn with_state(mut self, state: IndexState) -> Self {
        self.state = state;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IndexState::{Deleted, Error, ReadWrite, WriteOnly};

    #[test]
    fn transition_table() {
        let allowed = [
            (WriteOnly, ReadWrite),
            (WriteOnly, Deleted),
            (WriteOnly, Error),
            (ReadWrite, Deleted),
            (Error, Deleted),
            (Deleted, Error),
        ];
        for from in [WriteOnly, ReadWrite, Error, Deleted] {
            for to in [WriteOnly, ReadWrite, Error, Deleted] {
                let expected = from == to || allowed.contains(&(from, to));
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn deleted_cannot_serve_again() {
        assert!(!Deleted.can_transition_to(ReadWrite));
        assert!(Deleted.can_transition_to(Error));
    }
}
