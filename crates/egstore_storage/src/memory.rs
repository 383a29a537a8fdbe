//! In-memory storage backend.

use crate::backend::{IdAllocation, StorageBackend};
use crate::entity::EntityRecord;
use crate::error::{StorageError, StorageResult};
use crate::ids::{id_to_counter, to_scattered_id, IdSpace};
use crate::key::{EntityGroupKey, IdOrName, Key};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};

type KindKey = (String, String, String);

#[derive(Debug, Default)]
struct Records {
    by_key: BTreeMap<Key, EntityRecord>,
    by_kind: HashMap<KindKey, BTreeSet<Key>>,
}

impl Records {
    fn kind_key(key: &Key) -> KindKey {
        (key.app.clone(), key.namespace.clone(), key.kind().to_string())
    }
}

#[derive(Debug)]
struct IdCounters {
    sequential: i64,
    scattered: i64,
}

impl Default for IdCounters {
    fn default() -> Self {
        Self {
            sequential: 1,
            scattered: 1,
        }
    }
}

impl IdCounters {
    fn counter_mut(&mut self, space: IdSpace) -> &mut i64 {
        match space {
            IdSpace::Sequential => &mut self.sequential,
            IdSpace::Scattered => &mut self.scattered,
        }
    }

    fn reserve(&mut self, id: i64) -> StorageResult<()> {
        let (count, space) = id_to_counter(id)?;
        let counter = self.counter_mut(space);
        if count >= *counter {
            *counter = count + 1;
        }
        Ok(())
    }
}

/// An in-memory storage backend.
///
/// Records live in a key-ordered map, so an entity group is the contiguous
/// range that starts at its root key. A secondary index by
/// `(app, namespace, kind)` serves kind scans.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use egstore_storage::{Entity, EntityRecord, InMemoryBackend, Key, StorageBackend};
///
/// let backend = InMemoryBackend::new();
/// let root = Key::with_id("app", "Album", 1);
/// backend.put(EntityRecord::new(Entity::new(root.clone())), true).unwrap();
/// backend.put(EntityRecord::new(Entity::new(root.child("Photo", 1))), true).unwrap();
///
/// let group = backend.entities_in_group(&root.entity_group().unwrap()).unwrap();
/// assert_eq!(group.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    records: RwLock<Records>,
    ids: Mutex<IdCounters>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().by_key.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageBackend for InMemoryBackend {
    fn put(&self, record: EntityRecord, insert: bool) -> StorageResult<()> {
        let mut records = self.records.write();
        let key = record.key().clone();
        if insert && records.by_key.contains_key(&key) {
            return Err(StorageError::AlreadyExists {
                key: key.to_string(),
            });
        }
        records
            .by_kind
            .entry(Records::kind_key(&key))
            .or_default()
            .insert(key.clone());
        records.by_key.insert(key, record);
        Ok(())
    }

    fn delete(&self, key: &Key) -> StorageResult<()> {
        let mut records = self.records.write();
        if records.by_key.remove(key).is_some() {
            let kind_key = Records::kind_key(key);
            if let Some(keys) = records.by_kind.get_mut(&kind_key) {
                keys.remove(key);
                if keys.is_empty() {
                    records.by_kind.remove(&kind_key);
                }
            }
        }
        Ok(())
    }

    fn get(&self, key: &Key) -> StorageResult<Option<EntityRecord>> {
        Ok(self.records.read().by_key.get(key).cloned())
    }

    fn entities_in_group(
        &self,
        group: &EntityGroupKey,
    ) -> StorageResult<BTreeMap<Key, EntityRecord>> {
        let root = group.as_key();
        let records = self.records.read();
        Ok(records
            .by_key
            .range(root..)
            .take_while(|(key, _)| key.has_ancestor(root))
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect())
    }

    fn scan(&self, app: &str, namespace: &str, kind: &str) -> StorageResult<Vec<EntityRecord>> {
        let records = self.records.read();
        if kind.is_empty() {
            return Ok(records
                .by_key
                .values()
                .filter(|r| r.key().app == app && r.key().namespace == namespace)
                .cloned()
                .collect());
        }
        let kind_key = (app.to_string(), namespace.to_string(), kind.to_string());
        let Some(keys) = records.by_kind.get(&kind_key) else {
            return Ok(Vec::new());
        };
        keys.iter()
            .map(|key| {
                records.by_key.get(key).cloned().ok_or_else(|| {
                    StorageError::Corrupted(format!("kind index references missing {key}"))
                })
            })
            .collect()
    }

    fn allocate_sequential_ids(
        &self,
        _key: &Key,
        request: IdAllocation,
    ) -> StorageResult<(i64, i64)> {
        let mut ids = self.ids.lock();
        let start = ids.sequential;
        match request {
            IdAllocation::Size(0) => {
                return Err(StorageError::invalid_argument("Size must be greater than 0."));
            }
            IdAllocation::Size(size) => {
                let size = i64::try_from(size)
                    .map_err(|_| StorageError::invalid_argument("Size is too large."))?;
                ids.sequential = start.saturating_add(size);
            }
            IdAllocation::UpTo(max) if max < 0 => {
                return Err(StorageError::invalid_argument(
                    "Max must be greater than or equal to 0.",
                ));
            }
            IdAllocation::UpTo(max) => {
                let next = max
                    .checked_add(1)
                    .ok_or_else(|| StorageError::invalid_argument("Max is too large."))?;
                ids.sequential = start.max(next);
            }
        }
        Ok((start, ids.sequential - 1))
    }

    fn allocate_ids(&self, keys: Vec<Key>) -> StorageResult<Vec<Key>> {
        let mut ids = self.ids.lock();
        let mut completed = Vec::new();
        for mut key in keys {
            if key.is_complete() {
                for id in key.path.iter().filter_map(|e| e.id()) {
                    ids.reserve(id)?;
                }
                continue;
            }
            let id = to_scattered_id(ids.scattered)?;
            ids.scattered += 1;
            if let Some(last) = key.last_mut() {
                last.id_or_name = Some(IdOrName::Id(id));
            }
            completed.push(key);
        }
        Ok(completed)
    }

    fn clear(&self) -> StorageResult<()> {
        *self.records.write() = Records::default();
        *self.ids.lock() = IdCounters::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::ids::MAX_SEQUENTIAL_ID;

    fn record(key: Key) -> EntityRecord {
        EntityRecord::new(Entity::new(key))
    }

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty());
        assert!(backend.scan("app", "", "Kind").unwrap().is_empty());
    }

    #[test]
    fn insert_rejects_existing_key() {
        let backend = InMemoryBackend::new();
        let key = Key::with_id("app", "K", 1);
        backend.put(record(key.clone()), true).unwrap();
        let err = backend.put(record(key.clone()), true).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        backend.put(record(key), false).unwrap();
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn group_range_stops_at_next_root() {
        let backend = InMemoryBackend::new();
        let a = Key::with_id("app", "A", 1);
        let b = Key::with_id("app", "A", 2);
        backend.put(record(a.clone()), false).unwrap();
        backend.put(record(a.child("C", 1)), false).unwrap();
        backend.put(record(a.child("C", 2).child("D", 1)), false).unwrap();
        backend.put(record(b.clone()), false).unwrap();

        let group = backend.entities_in_group(&a.entity_group().unwrap()).unwrap();
        assert_eq!(group.len(), 3);
        assert!(!group.contains_key(&b));
    }

    #[test]
    fn scan_by_kind_and_delete() {
        let backend = InMemoryBackend::new();
        let root = Key::with_id("app", "A", 1);
        backend.put(record(root.clone()), false).unwrap();
        backend.put(record(root.child("B", 1)), false).unwrap();
        backend.put(record(Key::with_id("other", "B", 1)), false).unwrap();

        assert_eq!(backend.scan("app", "", "B").unwrap().len(), 1);
        assert_eq!(backend.scan("app", "", "").unwrap().len(), 2);

        backend.delete(&root.child("B", 1)).unwrap();
        assert!(backend.scan("app", "", "B").unwrap().is_empty());
        backend.delete(&root.child("B", 1)).unwrap();
    }

    #[test]
    fn sequential_allocation() {
        let backend = InMemoryBackend::new();
        let key = Key::incomplete("app", "K");
        assert_eq!(
            backend.allocate_sequential_ids(&key, IdAllocation::Size(10)).unwrap(),
            (1, 10)
        );
        assert_eq!(
            backend.allocate_sequential_ids(&key, IdAllocation::UpTo(100)).unwrap(),
            (11, 100)
        );
        let (start, end) = backend
            .allocate_sequential_ids(&key, IdAllocation::UpTo(50))
            .unwrap();
        assert!(end < start);
        assert!(backend
            .allocate_sequential_ids(&key, IdAllocation::Size(0))
            .is_err());
    }

    #[test]
    fn up_to_the_largest_id_is_rejected_without_moving_the_counter() {
        let backend = InMemoryBackend::new();
        let key = Key::incomplete("app", "K");
        let err = backend
            .allocate_sequential_ids(&key, IdAllocation::UpTo(i64::MAX))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
        assert_eq!(
            backend.allocate_sequential_ids(&key, IdAllocation::Size(1)).unwrap(),
            (1, 1)
        );
        assert_eq!(
            backend
                .allocate_sequential_ids(&key, IdAllocation::UpTo(i64::MAX - 1))
                .unwrap(),
            (2, i64::MAX - 1)
        );
    }

    #[test]
    fn allocate_ids_completes_and_reserves() {
        let backend = InMemoryBackend::new();
        let complete = Key::with_id("app", "K", 500);
        let completed = backend
            .allocate_ids(vec![complete, Key::incomplete("app", "K")])
            .unwrap();
        assert_eq!(completed.len(), 1);
        let id = completed[0].last().and_then(|e| e.id()).unwrap();
        assert!(id > MAX_SEQUENTIAL_ID);

        let (start, _) = backend
            .allocate_sequential_ids(&Key::incomplete("app", "K"), IdAllocation::Size(1))
            .unwrap();
        assert_eq!(start, 501);
    }

    #[test]
    fn clear_resets_everything() {
        let backend = InMemoryBackend::new();
        let key = Key::incomplete("app", "K");
        backend.put(record(Key::with_id("app", "K", 1)), false).unwrap();
        backend
            .allocate_sequential_ids(&key, IdAllocation::Size(5))
            .unwrap();
        backend.clear().unwrap();
        assert!(backend.is_empty());
        assert_eq!(
            backend.allocate_sequential_ids(&key, IdAllocation::Size(1)).unwrap(),
            (1, 1)
        );
    }
}
