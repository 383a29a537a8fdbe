//! Storage backend trait definition.

use crate::entity::EntityRecord;
use crate::error::StorageResult;
use crate::key::{EntityGroupKey, Key};
use std::collections::BTreeMap;

/// How many sequential ids to reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdAllocation {
    /// Reserve exactly this many ids. Must be positive.
    Size(u64),
    /// Make sure no id up to and including this one is handed out again.
    UpTo(i64),
}

/// A storage backend for egstore.
///
/// Backends are **blind record stores**. They persist and return records
/// but know nothing about transactions, versions or consistency: the engine
/// serializes access per entity group before it calls into a backend.
///
/// # Invariants
///
/// - `put` with `insert = true` fails if the key is already stored
/// - `get` returns an independent copy of the stored record
/// - `entities_in_group` returns every record whose key descends from the group root
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - Records kept in process memory
pub trait StorageBackend: Send + Sync {
    /// Stores a record, replacing any previous record with the same key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::AlreadyExists`] when `insert` is set
    /// and the key is already present.
    fn put(&self, record: EntityRecord, insert: bool) -> StorageResult<()>;

    /// Removes the record stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot perform the delete.
    fn delete(&self, key: &Key) -> StorageResult<()>;

    /// Returns a copy of the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot perform the read.
    fn get(&self, key: &Key) -> StorageResult<Option<EntityRecord>>;

    /// Returns copies of every record in an entity group, keyed by entity key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot perform the read.
    fn entities_in_group(&self, group: &EntityGroupKey)
        -> StorageResult<BTreeMap<Key, EntityRecord>>;

    /// Returns copies of every record of `kind` in `(app, namespace)`, in key order.
    ///
    /// An empty `kind` scans every kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot perform the read.
    fn scan(&self, app: &str, namespace: &str, kind: &str) -> StorageResult<Vec<EntityRecord>>;

    /// Reserves a block of sequential ids and returns the inclusive range.
    ///
    /// With [`IdAllocation::UpTo`] below the current counter the returned
    /// range is empty (`end < start`).
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::InvalidArgument`] for a zero size or
    /// a negative maximum.
    fn allocate_sequential_ids(&self, key: &Key, request: IdAllocation)
        -> StorageResult<(i64, i64)>;

    /// Completes every incomplete key with a scattered id and returns them.
    ///
    /// Complete keys are not returned; their ids are reserved instead so
    /// they are never handed out again.
    ///
    /// # Errors
    ///
    /// Returns an error when an id space is exhausted.
    fn allocate_ids(&self, keys: Vec<Key>) -> StorageResult<Vec<Key>>;

    /// Removes every record and resets the id counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be cleared.
    fn clear(&self) -> StorageResult<()>;
}
