//! Frozen writes of a committed transaction.

use crate::error::{CoreError, CoreResult};
use crate::stats::DatastoreStats;
use crate::transaction::metadata::GroupState;
use egstore_storage::{EntityGroupKey, EntityRecord, Key, StorageBackend};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Writes of one transaction on one entity group.
#[derive(Debug, Default, Clone)]
pub(crate) struct GroupWrites {
    /// Records to store, with their insert flag. Versions are already assigned.
    pub(crate) puts: Vec<(EntityRecord, bool)>,
    /// Keys to remove.
    pub(crate) deletes: Vec<Key>,
}

/// A committed transaction waiting in one or more apply queues.
///
/// Immutable once built; each group's queue holds it until that group has
/// applied it.
#[derive(Debug)]
pub(crate) struct CommittedTxn {
    id: u64,
    app: String,
    commit_time_ms: u64,
    groups: BTreeMap<EntityGroupKey, GroupWrites>,
}

impl CommittedTxn {
    pub(crate) fn new(
        id: u64,
        app: String,
        commit_time_ms: u64,
        groups: BTreeMap<EntityGroupKey, GroupWrites>,
    ) -> Self {
        Self {
            id,
            app,
            commit_time_ms,
            groups,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Wall-clock time of the commit.
    pub(crate) fn commit_time_ms(&self) -> u64 {
        self.commit_time_ms
    }

    /// Pushes this transaction's writes on `state`'s group into the backend.
    ///
    /// Holding `&mut GroupState` means holding the group lock. The
    /// transaction must be the head of the group's apply queue.
    pub(crate) fn apply(
        &self,
        state: &mut GroupState,
        backend: &dyn StorageBackend,
        stats: &DatastoreStats,
    ) -> CoreResult<()> {
        if !state.is_head(self) {
            error!(group = %state.group, txn = self.id, "transaction applied out of order");
            return Err(CoreError::internal("Transaction is not appliable"));
        }
        let writes = self.groups.get(&state.group).ok_or_else(|| {
            CoreError::internal(format!(
                "transaction {} has no writes for {}",
                self.id, state.group
            ))
        })?;

        for (record, insert) in &writes.puts {
            backend.put(record.clone(), *insert)?;
        }
        for key in &writes.deletes {
            backend.delete(key)?;
        }
        state.unlog(self)?;
        stats.record_apply();

        debug!(
            group = %state.group,
            txn = self.id,
            app = %self.app,
            puts = writes.puts.len(),
            deletes = writes.deletes.len(),
            "applied"
        );
        Ok(())
    }
}
