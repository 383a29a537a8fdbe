//! In-flight transactions.

use crate::actions::Action;
use crate::config::Config;
use crate::cost::{is_noop_write, write_ops};
use crate::cursor::ListCursor;
use crate::error::{CoreError, CoreResult};
use crate::index::CompositeIndex;
use crate::query::{execute, Query};
use crate::transaction::committed::{CommittedTxn, GroupWrites};
use crate::transaction::manager::ManagerCore;
use crate::transaction::metadata::{EntityGroupMetaData, Snapshot};
use crate::transaction::tracker::EntityGroupTracker;
use crate::types::{Cost, TransactionHandle};
use egstore_storage::{Entity, EntityGroupKey, EntityMetadata, EntityRecord, Key};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// State of a transaction.
///
/// `Active` is the only non-terminal state; `Failed` can still be rolled
/// back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting operations.
    Active,
    /// Committed; mutation versions are available.
    Committed,
    /// Rolled back explicitly or by a failed commit.
    RolledBack,
    /// A snapshot turned out to be inconsistent.
    Failed,
}

#[derive(Debug)]
struct TxnInner {
    state: TxnState,
    trackers: BTreeMap<EntityGroupKey, EntityGroupTracker>,
    actions: Vec<Action>,
    cost: Cost,
    mutation_versions: HashMap<Key, Option<u64>>,
    mutated: Vec<Key>,
    kind_to_indexes: HashMap<String, Vec<CompositeIndex>>,
}

impl TxnInner {
    fn ensure_active(&self) -> CoreResult<()> {
        if self.state == TxnState::Active {
            Ok(())
        } else {
            Err(CoreError::internal("transaction closed"))
        }
    }
}

/// One transaction.
///
/// Reads see the snapshot each entity group had when the transaction first
/// touched it; the transaction's own buffered writes are not visible.
/// Writes are buffered per entity group and validated at commit against the
/// group's log position.
///
/// Every public operation holds the transaction lock for its whole
/// duration and checks that the transaction is still active first.
pub struct LiveTxn {
    id: u64,
    app: String,
    allow_multiple_eg: bool,
    core: Arc<ManagerCore>,
    inner: Mutex<TxnInner>,
}

impl fmt::Debug for LiveTxn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveTxn")
            .field("id", &self.id)
            .field("app", &self.app)
            .field("allow_multiple_eg", &self.allow_multiple_eg)
            .field("state", &self.inner.try_lock().map(|inner| inner.state))
            .finish_non_exhaustive()
    }
}

fn group_of(key: &Key) -> CoreResult<EntityGroupKey> {
    key.entity_group()
        .map_err(|e| CoreError::bad_request(e.to_string()))
}

impl LiveTxn {
    pub(crate) fn new(id: u64, app: String, allow_multiple_eg: bool, core: Arc<ManagerCore>) -> Self {
        Self {
            id,
            app,
            allow_multiple_eg,
            core,
            inner: Mutex::new(TxnInner {
                state: TxnState::Active,
                trackers: BTreeMap::new(),
                actions: Vec::new(),
                cost: Cost::default(),
                mutation_versions: HashMap::new(),
                mutated: Vec::new(),
                kind_to_indexes: HashMap::new(),
            }),
        }
    }

    /// Transaction id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Owning app.
    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Handle under which the transaction is registered.
    #[must_use]
    pub fn handle(&self) -> TransactionHandle {
        TransactionHandle {
            app: self.app.clone(),
            handle: self.id,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.inner.lock().state
    }

    /// Write cost accumulated by the last commit attempt.
    #[must_use]
    pub fn cost(&self) -> Cost {
        self.inner.lock().cost
    }

    /// Returns the tracker of `key`'s group, creating it within the group caps.
    fn tracker<'a>(
        &self,
        inner: &'a mut TxnInner,
        key: &Key,
    ) -> CoreResult<(EntityGroupKey, &'a mut EntityGroupTracker)> {
        let group = group_of(key)?;
        if !inner.trackers.contains_key(&group) {
            if key.app != self.app {
                return Err(CoreError::bad_request(format!(
                    "Transactions cannot span applications (expected {}, got {})",
                    self.app, key.app
                )));
            }
            if self.allow_multiple_eg {
                if inner.trackers.len() >= self.core.max_entity_groups {
                    return Err(CoreError::bad_request(
                        "operating on too many entity groups in a single transaction.",
                    ));
                }
            } else if !inner.trackers.is_empty() {
                return Err(CoreError::bad_request(
                    "cross-groups transaction need to be explicitly specified (xg=True)",
                ));
            }
        }
        let tracker = inner
            .trackers
            .entry(group.clone())
            .or_insert_with(|| EntityGroupTracker::new(group.clone()));
        Ok((group, tracker))
    }

    /// Snapshots `key`'s group.
    ///
    /// The first snapshot of a group re-validates every group snapshotted
    /// before it, so that all snapshots of the transaction stay mutually
    /// consistent.
    fn grab_snapshot(&self, inner: &mut TxnInner, key: &Key) -> CoreResult<Arc<Snapshot>> {
        let (group, tracker) = self.tracker(inner, key)?;
        let check_contention = !tracker.has_snapshot();
        let snapshot = tracker.grab_snapshot(&self.core)?;
        if !check_contention {
            return Ok(snapshot);
        }

        let others: Vec<Arc<EntityGroupMetaData>> = inner
            .trackers
            .values()
            .filter(|other| other.has_snapshot() && other.group() != &group)
            .filter_map(|other| other.meta().cloned())
            .collect();
        let stale = {
            let guards = ManagerCore::lock_groups(&others);
            guards.iter().any(|state| {
                inner
                    .trackers
                    .get(&state.group)
                    .is_some_and(|other| !other.is_current(state.log_pos))
            })
        };
        if stale {
            inner.state = TxnState::Failed;
            self.core.stats.record_conflict();
            return Err(CoreError::concurrent_transaction("Concurrency exception."));
        }
        Ok(snapshot)
    }

    /// Reads `key` from the transaction's snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on a closed transaction, `BadRequest` when the key
    /// would exceed the group caps and `ConcurrentTransaction` when the new
    /// snapshot is inconsistent with earlier ones.
    pub fn get(&self, key: &Key) -> CoreResult<Option<EntityRecord>> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        let snapshot = self.grab_snapshot(&mut inner, key)?;
        Ok(snapshot.get(key).cloned())
    }

    /// Buffers a put of `entity`.
    ///
    /// With `insert`, the commit fails if the key already exists.
    /// `indexes` are the composite indexes of the entity's kind, used for
    /// the write cost.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on a closed transaction and `BadRequest` for an
    /// incomplete key or a group cap violation.
    pub fn put(&self, entity: Entity, insert: bool, indexes: Vec<CompositeIndex>) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        if !entity.key.is_complete() {
            return Err(CoreError::bad_request(format!(
                "cannot put entity with incomplete key {}",
                entity.key
            )));
        }
        let kind = entity.key.kind().to_string();
        let (_, tracker) = self.tracker(&mut inner, &entity.key)?;
        tracker.buffer_put(entity, insert);
        inner.kind_to_indexes.insert(kind, indexes);
        Ok(())
    }

    /// Buffers a delete of `key`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on a closed transaction and `BadRequest` for a
    /// group cap violation.
    pub fn delete(&self, key: Key, indexes: Vec<CompositeIndex>) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        let kind = key.kind().to_string();
        let (_, tracker) = self.tracker(&mut inner, &key)?;
        tracker.buffer_delete(key);
        inner.kind_to_indexes.insert(kind, indexes);
        Ok(())
    }

    /// Queues actions to fire after a successful commit.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the transaction would hold more than
    /// `max_actions` actions.
    pub fn add_actions(&self, actions: Vec<Action>, max_actions: Option<usize>) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        if let Some(max) = max_actions {
            if max > 0 && inner.actions.len() + actions.len() > max {
                return Err(CoreError::bad_request(format!(
                    "Too many messages, maximum allowed {max}"
                )));
            }
        }
        inner.actions.extend(actions);
        Ok(())
    }

    /// Runs an ancestor query against the ancestor group's snapshot.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for a query without ancestor, plus the errors of
    /// [`LiveTxn::get`] and query execution.
    pub fn get_query_cursor(
        &self,
        query: &Query,
        index_list: Vec<CompositeIndex>,
        config: &Config,
    ) -> CoreResult<ListCursor> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        let ancestor = query.ancestor.as_ref().ok_or_else(|| {
            CoreError::bad_request("Query must have an ancestor when performed in a transaction.")
        })?;
        let snapshot = self.grab_snapshot(&mut inner, ancestor)?;
        drop(inner);
        execute(snapshot.values().cloned().collect(), query, index_list, config)
    }

    /// Log position of `key`'s group as seen by this transaction.
    pub(crate) fn entity_group_read_position(&self, key: &Key) -> CoreResult<i64> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        let (_, tracker) = self.tracker(&mut inner, key)?;
        tracker.grab_snapshot(&self.core)?;
        Ok(tracker.read_pos().unwrap_or(-1))
    }

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns `Internal` unless the transaction is active or failed. The
    /// handle is unregistered either way.
    pub fn rollback(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        self.rollback_locked(&mut inner)
    }

    fn rollback_locked(&self, inner: &mut TxnInner) -> CoreResult<()> {
        self.core.remove_txn(self.id);
        if !matches!(inner.state, TxnState::Active | TxnState::Failed) {
            return Err(CoreError::internal("transaction closed"));
        }
        inner.state = TxnState::RolledBack;
        self.core.stats.record_transaction_rollback();
        debug!(txn = self.id, app = %self.app, "rolled back");
        Ok(())
    }

    /// Rolls back if still open. Used on error paths of implicit transactions.
    pub(crate) fn rollback_if_open(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, TxnState::Active | TxnState::Failed) {
            let _ = self.rollback_locked(&mut inner);
        }
    }

    /// Commits the transaction and returns its write cost.
    ///
    /// A transaction without writes or actions is rolled back instead and
    /// costs nothing. Any failure rolls the transaction back.
    ///
    /// # Errors
    ///
    /// - `Internal` on a closed transaction
    /// - `BadRequest` when an insert finds an existing entity
    /// - `ConcurrentTransaction` when a touched group was committed to
    ///   since it was snapshotted
    pub fn commit(&self) -> CoreResult<Cost> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;

        let groups = match self.commit_locked(&mut inner) {
            Ok(Some(groups)) => groups,
            Ok(None) => {
                self.rollback_locked(&mut inner)?;
                return Ok(Cost::default());
            }
            Err(err) => {
                let _ = self.rollback_locked(&mut inner);
                return Err(err);
            }
        };
        self.core.remove_txn(self.id);

        let cost = inner.cost;
        self.core.stats.record_transaction_commit();
        self.core
            .stats
            .record_writes(cost.entity_writes, cost.index_writes);
        for action in std::mem::take(&mut inner.actions) {
            match self.core.actions.enqueue(&action) {
                Ok(()) => self.core.stats.record_action(true),
                Err(err) => {
                    warn!(txn = self.id, queue = %action.queue, error = %err, "transactional action dropped");
                    self.core.stats.record_action(false);
                }
            }
        }
        debug!(txn = self.id, app = %self.app, groups = groups.len(), "committed");

        self.core.on_commit(&groups)?;
        Ok(cost)
    }

    /// Validates and logs the commit. Returns `None` for an empty
    /// transaction, otherwise the metadata of every logged group.
    fn commit_locked(&self, inner: &mut TxnInner) -> CoreResult<Option<Vec<Arc<EntityGroupMetaData>>>> {
        if inner.trackers.is_empty() {
            let global = EntityGroupKey::global(self.app.clone());
            inner
                .trackers
                .insert(global.clone(), EntityGroupTracker::new(global));
        }

        let TxnInner {
            state,
            trackers,
            actions,
            cost,
            mutation_versions,
            mutated,
            kind_to_indexes,
        } = inner;

        let mut empty = true;
        for tracker in trackers.values_mut() {
            let snapshot = tracker.grab_snapshot(&self.core)?;
            empty = empty && tracker.is_empty();

            for (entity, insert) in tracker.put.values() {
                if *insert && snapshot.contains_key(&entity.key) {
                    return Err(CoreError::bad_request(
                        "the id allocated for a new entity was already in use, please try again",
                    ));
                }
                let old = snapshot.get(&entity.key);
                let old_entity = old.map(|record| &record.entity);
                mutated.push(entity.key.clone());
                let indexes = kind_to_indexes
                    .get(entity.key.kind())
                    .map_or(&[][..], Vec::as_slice);
                let (entity_writes, index_writes) = write_ops(indexes, old_entity, entity);
                cost.add(entity_writes, index_writes);
                if is_noop_write(old_entity, Some(entity)) {
                    mutation_versions.insert(entity.key.clone(), old.and_then(EntityRecord::version));
                    self.core.stats.record_noop_write();
                }
            }

            for key in tracker.delete.keys() {
                mutated.push(key.clone());
                match snapshot.get(key) {
                    Some(old) => {
                        let indexes = kind_to_indexes
                            .get(key.kind())
                            .map_or(&[][..], Vec::as_slice);
                        let (entity_writes, index_writes) = write_ops(indexes, None, &old.entity);
                        cost.add(entity_writes, index_writes);
                    }
                    None => {
                        mutation_versions.insert(key.clone(), Some(tracker.read_timestamp()));
                        self.core.stats.record_noop_write();
                    }
                }
            }
        }

        if empty && actions.is_empty() {
            return Ok(None);
        }

        let metas = trackers
            .values()
            .map(|tracker| {
                tracker.meta().cloned().ok_or_else(|| {
                    CoreError::internal(format!("no snapshot for {}", tracker.group()))
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;

        let mut guards = ManagerCore::lock_groups(&metas);
        for group_state in &guards {
            let current = trackers
                .get(&group_state.group)
                .is_some_and(|tracker| tracker.is_current(group_state.log_pos));
            if !current {
                self.core.stats.record_conflict();
                return Err(CoreError::concurrent_transaction("Concurrency exception."));
            }
        }

        let commit_time_ms = self.core.clock.now_ms();
        let write_timestamp = self.core.next_commit_timestamp();
        for key in mutated.iter() {
            mutation_versions
                .entry(key.clone())
                .or_insert(Some(write_timestamp));
        }

        let writes = trackers
            .iter()
            .map(|(group, tracker)| {
                let puts = tracker
                    .put
                    .values()
                    .map(|(entity, insert)| {
                        let record = EntityRecord {
                            entity: entity.clone(),
                            metadata: EntityMetadata {
                                updated_version: mutation_versions.get(&entity.key).copied().flatten(),
                            },
                        };
                        (record, *insert)
                    })
                    .collect();
                let deletes = tracker.delete.keys().cloned().collect();
                (group.clone(), GroupWrites { puts, deletes })
            })
            .collect();
        let committed = Arc::new(CommittedTxn::new(
            self.id,
            self.app.clone(),
            commit_time_ms,
            writes,
        ));
        for group_state in &mut guards {
            group_state.log(Arc::clone(&committed));
        }
        drop(guards);
        *state = TxnState::Committed;
        Ok(Some(metas))
    }

    /// Version `key` has after this transaction.
    ///
    /// # Errors
    ///
    /// Returns `Internal` unless the transaction committed and wrote `key`.
    pub fn mutation_version(&self, key: &Key) -> CoreResult<Option<u64>> {
        let inner = self.inner.lock();
        if inner.state != TxnState::Committed {
            return Err(CoreError::internal("transaction has not committed"));
        }
        inner
            .mutation_versions
            .get(key)
            .copied()
            .ok_or_else(|| CoreError::internal(format!("{key} was not written by transaction {}", self.id)))
    }
}
