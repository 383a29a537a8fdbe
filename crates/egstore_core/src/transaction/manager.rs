//! Transaction manager.

use crate::actions::ActionSink;
use crate::clock::Clock;
use crate::consistency::ConsistencyPolicy;
use crate::error::{CoreError, CoreResult};
use crate::stats::DatastoreStats;
use crate::transaction::live::LiveTxn;
use crate::transaction::metadata::{EntityGroupMetaData, GroupState, Snapshot};
use crate::types::{Caller, TransactionHandle};
use egstore_storage::{EntityGroupKey, StorageBackend};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// First version handed out by the commit clock.
pub const MINIMUM_VERSION: u64 = 1;

/// Shared engine state.
///
/// Lock order: the policy lock, then group locks in key order. The
/// metadata map lock and the transaction map lock are leaves and are never
/// held while another lock is taken.
pub(crate) struct ManagerCore {
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) actions: Arc<dyn ActionSink>,
    pub(crate) stats: Arc<DatastoreStats>,
    pub(crate) max_entity_groups: usize,
    policy: Mutex<ConsistencyPolicy>,
    meta_data: Mutex<HashMap<EntityGroupKey, Arc<EntityGroupMetaData>>>,
    txns: Mutex<HashMap<u64, Arc<LiveTxn>>>,
    commit_timestamp: Mutex<u64>,
    next_group_id: AtomicU64,
    next_txn_id: AtomicU64,
}

impl ManagerCore {
    /// Returns the metadata of `group`, creating it on first use.
    pub(crate) fn meta_data(&self, group: &EntityGroupKey) -> Arc<EntityGroupMetaData> {
        let mut map = self.meta_data.lock();
        let meta = map.entry(group.clone()).or_insert_with(|| {
            let id = self.next_group_id.fetch_add(1, Ordering::Relaxed);
            Arc::new(EntityGroupMetaData::new(id, group.clone()))
        });
        Arc::clone(meta)
    }

    /// Copies the metadata list, ordered by group, so no map lock is held
    /// while grooming and seeded policies replay identically.
    pub(crate) fn all_meta_data(&self) -> Vec<Arc<EntityGroupMetaData>> {
        let mut metas: Vec<_> = self.meta_data.lock().values().cloned().collect();
        metas.sort_by(|a, b| a.group().cmp(b.group()));
        metas
    }

    /// Returns a consistent snapshot of `group`.
    ///
    /// Under the group lock, a missing snapshot is rebuilt after applying
    /// every queued transaction. Returns `(meta, log_pos, read_timestamp,
    /// snapshot)`.
    pub(crate) fn grab_snapshot(
        &self,
        group: &EntityGroupKey,
    ) -> CoreResult<(Arc<EntityGroupMetaData>, i64, u64, Arc<Snapshot>)> {
        let meta = self.meta_data(group);
        let (log_pos, read_timestamp, snapshot) = {
            let mut state = meta.lock();
            let snapshot = match &state.snapshot {
                Some(snapshot) => Arc::clone(snapshot),
                None => {
                    state.catch_up(self.backend.as_ref(), &self.stats)?;
                    let snapshot = Arc::new(self.backend.entities_in_group(group)?);
                    state.snapshot = Some(Arc::clone(&snapshot));
                    state.read_timestamp = self.read_timestamp();
                    snapshot
                }
            };
            (state.log_pos, state.read_timestamp, snapshot)
        };
        Ok((meta, log_pos, read_timestamp, snapshot))
    }

    /// Locks `groups` in key order.
    pub(crate) fn lock_groups(groups: &[Arc<EntityGroupMetaData>]) -> Vec<MutexGuard<'_, GroupState>> {
        let mut sorted: Vec<&EntityGroupMetaData> = groups.iter().map(AsRef::as_ref).collect();
        sorted.sort_by(|a, b| a.group().cmp(b.group()));
        sorted.dedup_by(|a, b| a.group() == b.group());
        sorted.into_iter().map(EntityGroupMetaData::lock).collect()
    }

    /// Advances the commit clock to `max(clock + 1, now)` and returns it.
    pub(crate) fn next_commit_timestamp(&self) -> u64 {
        let mut timestamp = self.commit_timestamp.lock();
        *timestamp = (*timestamp + 1).max(self.clock.now_ms());
        *timestamp
    }

    /// The latest commit timestamp.
    pub(crate) fn read_timestamp(&self) -> u64 {
        *self.commit_timestamp.lock()
    }

    pub(crate) fn next_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn remove_txn(&self, id: u64) {
        self.txns.lock().remove(&id);
    }

    /// Hands committed groups to the consistency policy.
    pub(crate) fn on_commit(&self, groups: &[Arc<EntityGroupMetaData>]) -> CoreResult<()> {
        self.policy.lock().on_commit(groups, self)
    }

    pub(crate) fn is_master_slave(&self) -> bool {
        self.policy.lock().is_master_slave()
    }

    fn flush(&self) -> CoreResult<()> {
        for meta in self.all_meta_data() {
            if meta.pending() == 0 {
                continue;
            }
            meta.lock().catch_up(self.backend.as_ref(), &self.stats)?;
        }
        self.stats.record_flush();
        Ok(())
    }
}

impl fmt::Debug for ManagerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerCore")
            .field("groups", &self.meta_data.lock().len())
            .field("transactions", &self.txns.lock().len())
            .field("commit_timestamp", &self.read_timestamp())
            .finish_non_exhaustive()
    }
}

/// Creates, registers and finishes transactions.
///
/// The manager owns the entity group metadata, the commit clock and the
/// active [`ConsistencyPolicy`].
///
/// ## Locking
///
/// A transaction only takes group locks while it snapshots a group and
/// while it validates and logs its commit. Commits touching several groups
/// take their locks in key order so concurrent cross-group commits cannot
/// deadlock.
#[derive(Debug, Clone)]
pub struct TransactionManager {
    core: Arc<ManagerCore>,
}

impl TransactionManager {
    /// Creates a manager over `backend`.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        actions: Arc<dyn ActionSink>,
        stats: Arc<DatastoreStats>,
        policy: ConsistencyPolicy,
        max_entity_groups: usize,
    ) -> Self {
        Self {
            core: Arc::new(ManagerCore {
                backend,
                clock,
                actions,
                stats,
                max_entity_groups,
                policy: Mutex::new(policy),
                meta_data: Mutex::new(HashMap::new()),
                txns: Mutex::new(HashMap::new()),
                commit_timestamp: Mutex::new(MINIMUM_VERSION),
                next_group_id: AtomicU64::new(1),
                next_txn_id: AtomicU64::new(1),
            }),
        }
    }

    /// Begins a registered transaction for `app`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for a cross-group transaction under the
    /// master/slave policy.
    pub fn begin_transaction(&self, app: &str, allow_multiple_eg: bool) -> CoreResult<Arc<LiveTxn>> {
        if allow_multiple_eg && self.core.is_master_slave() {
            return Err(CoreError::bad_request(
                "transactions on multiple entity groups only allowed with the High Replication datastore",
            ));
        }
        let txn = Arc::new(LiveTxn::new(
            self.core.next_txn_id(),
            app.to_string(),
            allow_multiple_eg,
            Arc::clone(&self.core),
        ));
        self.core.txns.lock().insert(txn.id(), Arc::clone(&txn));
        self.core.stats.record_transaction_start();
        debug!(txn = txn.id(), app, xg = allow_multiple_eg, "begin transaction");
        Ok(txn)
    }

    /// Begins an unregistered single-group transaction.
    pub fn begin_implicit(&self, app: &str) -> LiveTxn {
        self.core.stats.record_transaction_start();
        LiveTxn::new(
            self.core.next_txn_id(),
            app.to_string(),
            false,
            Arc::clone(&self.core),
        )
    }

    /// Looks up a registered transaction.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` when the caller may not act for the handle's
    /// app, or when no transaction of that app is registered under it.
    pub fn get_txn(&self, handle: &TransactionHandle, caller: &Caller) -> CoreResult<Arc<LiveTxn>> {
        caller.check_app(&handle.app)?;
        self.core
            .txns
            .lock()
            .get(&handle.handle)
            .filter(|txn| txn.app() == handle.app)
            .cloned()
            .ok_or_else(|| CoreError::bad_request(format!("Transaction({handle}) not found")))
    }

    /// Lets the consistency policy apply what it considers replicated.
    ///
    /// # Errors
    ///
    /// Propagates backend and apply-order failures.
    pub fn groom(&self) -> CoreResult<()> {
        let mut policy = self.core.policy.lock();
        let groups: Vec<_> = self
            .core
            .all_meta_data()
            .into_iter()
            .filter(|meta| meta.pending() > 0)
            .collect();
        policy.on_groom(&groups, &self.core)?;
        self.core.stats.record_groom();
        Ok(())
    }

    /// Applies every queued transaction on every group.
    ///
    /// # Errors
    ///
    /// Propagates backend and apply-order failures.
    pub fn flush(&self) -> CoreResult<()> {
        let _policy = self.core.policy.lock();
        self.core.flush()
    }

    /// Discards all group metadata and registered transactions.
    ///
    /// Queued but unapplied transactions are dropped.
    pub fn clear(&self) {
        self.core.meta_data.lock().clear();
        self.core.txns.lock().clear();
    }

    /// Flushes, then switches to `policy`.
    ///
    /// # Errors
    ///
    /// Propagates flush failures; the old policy stays active.
    pub fn set_consistency_policy(&self, policy: ConsistencyPolicy) -> CoreResult<()> {
        let mut current = self.core.policy.lock();
        self.core.flush()?;
        *current = policy;
        Ok(())
    }

    /// Returns true under the master/slave policy.
    #[must_use]
    pub fn is_master_slave(&self) -> bool {
        self.core.is_master_slave()
    }

    /// The latest commit timestamp.
    #[must_use]
    pub fn read_timestamp(&self) -> u64 {
        self.core.read_timestamp()
    }

    /// Number of committed transactions not yet applied, summed over groups.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.core
            .all_meta_data()
            .iter()
            .map(|meta| meta.pending())
            .sum()
    }

    /// Number of registered transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.core.txns.lock().len()
    }

    /// Returns the metadata of `group`, creating it on first use.
    #[must_use]
    pub fn meta_data(&self, group: &EntityGroupKey) -> Arc<EntityGroupMetaData> {
        self.core.meta_data(group)
    }

    /// Shared statistics.
    #[must_use]
    pub fn stats(&self) -> &Arc<DatastoreStats> {
        &self.core.stats
    }

    pub(crate) fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.core.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, DiscardActions};
    use crate::clock::ManualClock;
    use crate::transaction::TxnState;
    use egstore_storage::{Entity, InMemoryBackend, Key};

    fn manager(policy: ConsistencyPolicy) -> (TransactionManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let manager = TransactionManager::new(
            Arc::new(InMemoryBackend::new()),
            clock.clone(),
            Arc::new(DiscardActions),
            Arc::new(DatastoreStats::new()),
            policy,
            25,
        );
        (manager, clock)
    }

    fn key(id: i64) -> Key {
        Key::with_id("app", "G", 1).child("E", id)
    }

    fn put(manager: &TransactionManager, key: &Key, value: i64) -> Option<u64> {
        let txn = manager.begin_implicit("app");
        txn.put(Entity::new(key.clone()).with("v", value), false, vec![])
            .unwrap();
        txn.commit().unwrap();
        txn.mutation_version(key).unwrap()
    }

    #[test]
    fn stale_snapshot_conflicts() {
        let (manager, _) = manager(ConsistencyPolicy::MasterSlave);
        put(&manager, &key(1), 1);

        let late = manager.begin_implicit("app");
        assert!(late.get(&key(2)).unwrap().is_none());
        put(&manager, &key(1), 2);

        late.put(Entity::new(key(2)).with("v", 1), false, vec![])
            .unwrap();
        let err = late.commit().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(late.state(), TxnState::RolledBack);
        assert_eq!(manager.stats().conflicts(), 1);
    }

    #[test]
    fn snapshot_after_commit_does_not_conflict() {
        let (manager, _) = manager(ConsistencyPolicy::MasterSlave);
        let v2 = put(&manager, &key(1), 2).unwrap();
        let v3 = put(&manager, &key(2), 1).unwrap();
        assert!(v3 > v2);
    }

    #[test]
    fn identical_put_keeps_version() {
        let (manager, clock) = manager(ConsistencyPolicy::MasterSlave);
        clock.set(1_000);
        let first = put(&manager, &key(1), 7);
        clock.set(2_000);
        let second = put(&manager, &key(1), 7);
        assert_eq!(first, second);
        assert_eq!(manager.stats().snapshot().noop_writes, 1);
    }

    #[test]
    fn versions_follow_the_commit_clock() {
        let (manager, clock) = manager(ConsistencyPolicy::MasterSlave);
        assert_eq!(put(&manager, &key(1), 1), Some(MINIMUM_VERSION + 1));
        clock.set(500);
        assert_eq!(put(&manager, &key(1), 2), Some(500));
        assert_eq!(put(&manager, &key(1), 3), Some(501));
        assert_eq!(manager.read_timestamp(), 501);
    }

    #[test]
    fn empty_commit_rolls_back() {
        let (manager, _) = manager(ConsistencyPolicy::MasterSlave);
        let txn = manager.begin_transaction("app", false).unwrap();
        txn.get(&key(1)).unwrap();
        let cost = txn.commit().unwrap();
        assert_eq!(cost, crate::types::Cost::default());
        assert_eq!(txn.state(), TxnState::RolledBack);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn actions_only_commit_uses_global_group() {
        let (manager, _) = manager(ConsistencyPolicy::MasterSlave);
        let txn = manager.begin_transaction("app", false).unwrap();
        txn.add_actions(vec![Action::new("q", b"x".to_vec())], Some(5))
            .unwrap();
        txn.commit().unwrap();
        assert_eq!(txn.state(), TxnState::Committed);
        let global = manager.meta_data(&EntityGroupKey::global("app"));
        assert_eq!(global.log_pos(), 0);
        assert_eq!(manager.stats().snapshot().actions_enqueued, 1);
    }

    #[derive(Debug)]
    struct RejectingSink;

    impl ActionSink for RejectingSink {
        fn enqueue(&self, action: &Action) -> CoreResult<()> {
            Err(CoreError::internal(format!("queue {} is unavailable", action.queue)))
        }
    }

    #[test]
    fn failed_actions_are_dropped_after_commit() {
        let manager = TransactionManager::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(ManualClock::new(0)),
            Arc::new(RejectingSink),
            Arc::new(DatastoreStats::new()),
            ConsistencyPolicy::MasterSlave,
            25,
        );
        let txn = manager.begin_transaction("app", false).unwrap();
        txn.put(Entity::new(key(1)).with("v", 9), false, vec![])
            .unwrap();
        txn.add_actions(vec![Action::new("q", b"x".to_vec())], Some(5))
            .unwrap();
        txn.commit().unwrap();
        assert_eq!(txn.state(), TxnState::Committed);

        let reader = manager.begin_implicit("app");
        let record = reader.get(&key(1)).unwrap().unwrap();
        assert_eq!(record.entity, Entity::new(key(1)).with("v", 9));
        let stats = manager.stats().snapshot();
        assert_eq!(stats.actions_dropped, 1);
        assert_eq!(stats.actions_enqueued, 0);
        assert_eq!(stats.transactions_committed, 1);
    }

    #[test]
    fn too_many_actions() {
        let (manager, _) = manager(ConsistencyPolicy::MasterSlave);
        let txn = manager.begin_transaction("app", false).unwrap();
        let actions = (0..6).map(|i| Action::new("q", vec![i])).collect();
        let err = txn.add_actions(actions, Some(5)).unwrap_err();
        assert_eq!(err.to_string(), "bad request: Too many messages, maximum allowed 5");
    }

    #[test]
    fn single_group_cap() {
        let (manager, _) = manager(ConsistencyPolicy::MasterSlave);
        let txn = manager.begin_transaction("app", false).unwrap();
        txn.get(&Key::with_id("app", "A", 1)).unwrap();
        let err = txn.get(&Key::with_id("app", "A", 2)).unwrap_err();
        assert!(err.to_string().contains("xg=True"));
    }

    #[test]
    fn cross_group_cap() {
        let (manager, _) = manager(ConsistencyPolicy::time_based());
        let txn = manager.begin_transaction("app", true).unwrap();
        for id in 0..25 {
            txn.delete(Key::with_id("app", "A", id), vec![]).unwrap();
        }
        let err = txn.delete(Key::with_id("app", "A", 99), vec![]).unwrap_err();
        assert!(err.to_string().contains("too many entity groups"));
    }

    #[test]
    fn cross_app_keys_are_rejected() {
        let (manager, _) = manager(ConsistencyPolicy::MasterSlave);
        let txn = manager.begin_implicit("app");
        let err = txn.get(&Key::with_id("other", "A", 1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "bad request: Transactions cannot span applications (expected app, got other)"
        );
    }

    #[test]
    fn cross_group_requires_high_replication() {
        let (manager, _) = manager(ConsistencyPolicy::MasterSlave);
        assert!(manager.begin_transaction("app", true).unwrap_err().is_bad_request());
    }

    #[test]
    fn insert_on_existing_key_fails() {
        let (manager, _) = manager(ConsistencyPolicy::MasterSlave);
        put(&manager, &key(1), 1);
        let txn = manager.begin_implicit("app");
        txn.put(Entity::new(key(1)), true, vec![]).unwrap();
        let err = txn.commit().unwrap_err();
        assert!(err.to_string().contains("already in use"));
        assert_eq!(txn.state(), TxnState::RolledBack);
    }

    #[test]
    fn closed_transactions_reject_operations() {
        let (manager, _) = manager(ConsistencyPolicy::MasterSlave);
        let txn = manager.begin_transaction("app", false).unwrap();
        txn.rollback().unwrap();
        assert!(matches!(txn.get(&key(1)), Err(CoreError::Internal { .. })));
        assert!(matches!(txn.rollback(), Err(CoreError::Internal { .. })));
        assert!(matches!(
            txn.mutation_version(&key(1)),
            Err(CoreError::Internal { .. })
        ));
    }

    #[test]
    fn handles_are_scoped_to_their_app() {
        let (manager, _) = manager(ConsistencyPolicy::MasterSlave);
        let txn = manager.begin_transaction("app", false).unwrap();
        let handle = txn.handle();
        assert_eq!(manager.get_txn(&handle, &Caller::app("app")).unwrap().id(), txn.id());
        assert!(manager.get_txn(&handle, &Caller::app("other")).is_err());

        let forged = TransactionHandle {
            app: "other".into(),
            handle: handle.handle,
        };
        let err = manager.get_txn(&forged, &Caller::trusted("admin")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn inconsistent_second_snapshot_fails_the_transaction() {
        let (manager, _) = manager(ConsistencyPolicy::time_based());
        let a = Key::with_id("app", "A", 1);
        let b = Key::with_id("app", "B", 1);

        let txn = manager.begin_transaction("app", true).unwrap();
        txn.get(&a).unwrap();
        put(&manager, &a, 1);

        assert!(txn.get(&b).unwrap_err().is_retryable());
        assert_eq!(txn.state(), TxnState::Failed);
        txn.rollback().unwrap();
        assert_eq!(txn.state(), TxnState::RolledBack);
    }

    #[test]
    fn high_replication_queues_until_flush() {
        let (manager, _) = manager(ConsistencyPolicy::pseudo_random(0.0, 1).unwrap());
        let first = Key::with_id("app", "G", 1);
        let second = Key::with_id("app", "G", 2);
        put(&manager, &first, 1);
        put(&manager, &second, 1);
        assert_eq!(manager.pending_count(), 2);

        manager.groom().unwrap();
        assert_eq!(manager.pending_count(), 2);

        manager.flush().unwrap();
        assert_eq!(manager.pending_count(), 0);
        assert!(manager.backend().get(&second).unwrap().is_some());
    }

    #[test]
    fn snapshots_catch_up_pending_writes() {
        let (manager, _) = manager(ConsistencyPolicy::pseudo_random(0.0, 1).unwrap());
        put(&manager, &key(1), 5);
        assert!(manager.backend().get(&key(1)).unwrap().is_none());

        let txn = manager.begin_implicit("app");
        let record = txn.get(&key(1)).unwrap().unwrap();
        assert_eq!(record.entity.get("v").and_then(|v| v.as_integer()), Some(5));
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn time_based_visibility_waits_for_the_delay() {
        let (manager, clock) = manager(ConsistencyPolicy::time_based());
        put(&manager, &key(1), 1);

        clock.advance(99);
        manager.groom().unwrap();
        assert_eq!(manager.pending_count(), 1);

        clock.advance(240_000);
        manager.groom().unwrap();
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn switching_policy_flushes() {
        let (manager, _) = manager(ConsistencyPolicy::pseudo_random(0.0, 1).unwrap());
        put(&manager, &key(1), 1);
        manager
            .set_consistency_policy(ConsistencyPolicy::MasterSlave)
            .unwrap();
        assert_eq!(manager.pending_count(), 0);
        assert!(manager.is_master_slave());
    }

    #[test]
    fn clear_forgets_groups_and_transactions() {
        let (manager, _) = manager(ConsistencyPolicy::MasterSlave);
        let txn = manager.begin_transaction("app", false).unwrap();
        put(&manager, &key(1), 1);
        manager.clear();
        assert_eq!(manager.active_count(), 0);
        assert!(manager.get_txn(&txn.handle(), &Caller::app("app")).is_err());
        assert_eq!(manager.meta_data(&key(1).entity_group().unwrap()).log_pos(), -1);
    }
}
