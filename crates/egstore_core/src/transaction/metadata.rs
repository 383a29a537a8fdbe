//! Per entity group shared state.

use crate::error::{CoreError, CoreResult};
use crate::stats::DatastoreStats;
use crate::transaction::committed::CommittedTxn;
use egstore_storage::{EntityGroupKey, EntityRecord, Key, StorageBackend};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::error;

/// A point-in-time copy of an entity group, keyed by entity key.
pub type Snapshot = BTreeMap<Key, EntityRecord>;

/// Process-wide state of one entity group.
///
/// Created lazily by the transaction manager and kept until the manager is
/// cleared. The mutex doubles as the group's write lock: whoever holds the
/// [`GroupState`] guard may log, apply and snapshot.
#[derive(Debug)]
pub struct EntityGroupMetaData {
    id: u64,
    group: EntityGroupKey,
    state: Mutex<GroupState>,
}

impl EntityGroupMetaData {
    pub(crate) fn new(id: u64, group: EntityGroupKey) -> Self {
        Self {
            id,
            state: Mutex::new(GroupState::new(group.clone())),
            group,
        }
    }

    /// Numeric id, unique per manager. Seeds the replication delay draw.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The entity group key.
    #[must_use]
    pub fn group(&self) -> &EntityGroupKey {
        &self.group
    }

    /// Current log position. `-1` until the first commit.
    #[must_use]
    pub fn log_pos(&self) -> i64 {
        self.state.lock().log_pos
    }

    /// Number of committed transactions waiting to be applied.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().apply_queue.len()
    }

    /// Takes the group's write lock.
    pub(crate) fn lock(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock()
    }
}

/// State guarded by the group write lock.
#[derive(Debug)]
pub(crate) struct GroupState {
    pub(crate) group: EntityGroupKey,
    pub(crate) log_pos: i64,
    apply_queue: VecDeque<Arc<CommittedTxn>>,
    pub(crate) snapshot: Option<Arc<Snapshot>>,
    pub(crate) read_timestamp: u64,
}

impl GroupState {
    fn new(group: EntityGroupKey) -> Self {
        Self {
            group,
            log_pos: -1,
            apply_queue: VecDeque::new(),
            snapshot: None,
            read_timestamp: 0,
        }
    }

    /// The oldest committed transaction not yet applied.
    pub(crate) fn head(&self) -> Option<Arc<CommittedTxn>> {
        self.apply_queue.front().cloned()
    }

    pub(crate) fn is_head(&self, txn: &CommittedTxn) -> bool {
        self.apply_queue
            .front()
            .is_some_and(|head| std::ptr::eq(Arc::as_ptr(head), txn))
    }

    /// Applies every outstanding transaction in commit order.
    pub(crate) fn catch_up(
        &mut self,
        backend: &dyn StorageBackend,
        stats: &DatastoreStats,
    ) -> CoreResult<()> {
        while let Some(head) = self.head() {
            head.apply(self, backend, stats)?;
        }
        Ok(())
    }

    /// Queues a committed transaction and invalidates the cached snapshot.
    pub(crate) fn log(&mut self, txn: Arc<CommittedTxn>) {
        self.apply_queue.push_back(txn);
        self.log_pos += 1;
        self.snapshot = None;
    }

    /// Removes `txn` from the head of the queue.
    pub(crate) fn unlog(&mut self, txn: &CommittedTxn) -> CoreResult<()> {
        if !self.is_head(txn) {
            error!(group = %self.group, txn = txn.id(), "apply out of commit order");
            return Err(CoreError::internal("Transaction is not appliable"));
        }
        self.apply_queue.pop_front();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.apply_queue.len()
    }
}
