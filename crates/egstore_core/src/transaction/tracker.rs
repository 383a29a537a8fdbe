//! A transaction's view of one entity group.

use crate::error::CoreResult;
use crate::transaction::manager::ManagerCore;
use crate::transaction::metadata::{EntityGroupMetaData, Snapshot};
use egstore_storage::{Entity, EntityGroupKey, Key};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Buffered writes and snapshot of one entity group inside a transaction.
///
/// The snapshot is taken lazily on first read (or at commit) and never
/// changes afterwards.
#[derive(Debug)]
pub struct EntityGroupTracker {
    group: EntityGroupKey,
    meta: Option<Arc<EntityGroupMetaData>>,
    snapshot: Option<Arc<Snapshot>>,
    read_pos: Option<i64>,
    read_timestamp: u64,
    pub(crate) put: BTreeMap<Key, (Entity, bool)>,
    pub(crate) delete: BTreeMap<Key, Key>,
}

impl EntityGroupTracker {
    pub(crate) fn new(group: EntityGroupKey) -> Self {
        Self {
            group,
            meta: None,
            snapshot: None,
            read_pos: None,
            read_timestamp: 0,
            put: BTreeMap::new(),
            delete: BTreeMap::new(),
        }
    }

    /// The tracked group.
    #[must_use]
    pub fn group(&self) -> &EntityGroupKey {
        &self.group
    }

    /// Log position observed when the snapshot was taken.
    #[must_use]
    pub fn read_pos(&self) -> Option<i64> {
        self.read_pos
    }

    /// Commit timestamp current when the snapshot was taken.
    #[must_use]
    pub fn read_timestamp(&self) -> u64 {
        self.read_timestamp
    }

    /// Returns true once a snapshot has been taken.
    #[must_use]
    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Returns true if the tracker buffers no write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.put.is_empty() && self.delete.is_empty()
    }

    pub(crate) fn meta(&self) -> Option<&Arc<EntityGroupMetaData>> {
        self.meta.as_ref()
    }

    /// Returns the snapshot, taking it first if needed.
    pub(crate) fn grab_snapshot(&mut self, core: &ManagerCore) -> CoreResult<Arc<Snapshot>> {
        if let Some(snapshot) = &self.snapshot {
            return Ok(Arc::clone(snapshot));
        }
        let (meta, log_pos, read_timestamp, snapshot) = core.grab_snapshot(&self.group)?;
        self.meta = Some(meta);
        self.read_pos = Some(log_pos);
        self.read_timestamp = read_timestamp;
        self.snapshot = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Buffers a put, replacing a pending delete of the same key.
    pub(crate) fn buffer_put(&mut self, entity: Entity, insert: bool) {
        self.delete.remove(&entity.key);
        self.put.insert(entity.key.clone(), (entity, insert));
    }

    /// Buffers a delete, replacing a pending put of the same key.
    pub(crate) fn buffer_delete(&mut self, key: Key) {
        self.put.remove(&key);
        self.delete.insert(key.clone(), key);
    }

    /// Returns true if the group has not been logged since the snapshot.
    ///
    /// `log_pos` must be read under the group lock.
    pub(crate) fn is_current(&self, log_pos: i64) -> bool {
        self.read_pos == Some(log_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_delete_replace_each_other() {
        let key = Key::with_id("app", "A", 1);
        let mut tracker = EntityGroupTracker::new(key.entity_group().unwrap());
        tracker.buffer_put(Entity::new(key.clone()), false);
        tracker.buffer_delete(key.clone());
        assert!(tracker.put.is_empty());
        assert_eq!(tracker.delete.len(), 1);

        tracker.buffer_put(Entity::new(key), true);
        assert!(tracker.delete.is_empty());
        assert_eq!(tracker.put.len(), 1);
        assert!(!tracker.is_empty());
    }
}
