//! Datastore facade.

use crate::actions::{Action, ActionSink, DiscardActions};
use crate::clock::{Clock, SystemClock};
use crate::config::{AutoIdPolicy, Config};
use crate::consistency::ConsistencyPolicy;
use crate::cursor::ListCursor;
use crate::error::{CoreError, CoreResult};
use crate::index::{
    required_index, CompositeIndex, IndexDefinition, IndexManager, IndexState, KindIndexCache,
};
use crate::pseudo::{EntityGroupPseudoKind, PseudoKind};
use crate::query::{execute, Query};
use crate::stats::StatsSnapshot;
use crate::transaction::{LiveTxn, TransactionManager};
use crate::types::{Caller, Cost, TransactionHandle};
use egstore_storage::{
    Entity, EntityGroupKey, IdAllocation, IdOrName, InMemoryBackend, Key, PathElement,
    StorageBackend,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of looking up one key.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    /// The entity, if it exists.
    pub entity: Option<Entity>,
    /// Version of the entity. For a missing entity this is the read
    /// timestamp the absence was observed at, unless the read was eventually
    /// consistent.
    pub version: Option<u64>,
}

/// Result of a batch of puts or deletes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mutation {
    /// Keys written, completed where ids were allocated.
    pub keys: Vec<Key>,
    /// Version of each key after the write. `None` for transactional writes.
    pub versions: Vec<Option<u64>>,
    /// Write cost of the implicit transactions.
    pub cost: Cost,
}

/// Rolls an implicit transaction back when dropped while still open.
struct ImplicitTxn(LiveTxn);

impl Deref for ImplicitTxn {
    type Target = LiveTxn;

    fn deref(&self) -> &LiveTxn {
        &self.0
    }
}

impl Drop for ImplicitTxn {
    fn drop(&mut self) {
        self.0.rollback_if_open();
    }
}

/// The datastore.
///
/// `Datastore` composes the [`TransactionManager`], the [`IndexManager`]
/// and the pseudo kind registry into the entry point used by callers:
///
/// - Lookups, puts, deletes and touches, transactional or not
/// - Queries with cursors
/// - Explicit transactions identified by [`TransactionHandle`]s
/// - Composite index management and id allocation
///
/// Operations outside a transaction are split by entity group and every
/// group runs in its own implicit transaction, retried on conflicts as
/// configured by [`crate::RetryConfig`]. Every request carries a [`Caller`];
/// untrusted callers only reach their own app.
///
/// # Example
///
/// ```rust
/// use egstore_core::{Caller, Config, Datastore};
/// use egstore_storage::{Entity, Key};
///
/// let datastore = Datastore::in_memory(Config::default());
/// let caller = Caller::app("app");
///
/// let put = datastore
///     .put(vec![Entity::new(Key::incomplete("app", "Person")).with("age", 30)], None, &caller)
///     .unwrap();
/// let found = datastore.get(&put.keys, None, false, &caller).unwrap();
/// assert!(found[0].entity.is_some());
/// ```
#[derive(Debug)]
pub struct Datastore {
    config: Config,
    manager: TransactionManager,
    indexes: IndexManager,
    index_cache: Arc<KindIndexCache>,
    pseudo_kinds: RwLock<HashMap<String, Arc<dyn PseudoKind>>>,
    auto_id_policy: RwLock<AutoIdPolicy>,
}

impl Datastore {
    /// Creates a datastore over `backend` using the system clock and
    /// discarding transactional actions.
    pub fn new(backend: Arc<dyn StorageBackend>, config: Config) -> Self {
        Self::with_collaborators(backend, Arc::new(SystemClock), Arc::new(DiscardActions), config)
    }

    /// Creates a datastore over a fresh [`InMemoryBackend`].
    pub fn in_memory(config: Config) -> Self {
        Self::new(Arc::new(InMemoryBackend::new()), config)
    }

    /// Creates a datastore with an explicit clock and action sink.
    ///
    /// The `__entity_group__` pseudo kind is registered on creation.
    pub fn with_collaborators(
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        actions: Arc<dyn ActionSink>,
        config: Config,
    ) -> Self {
        let entity_group_kind = EntityGroupPseudoKind::new(clock.as_ref());
        let manager = TransactionManager::new(
            backend,
            clock,
            actions,
            Arc::default(),
            config.consistency.clone(),
            config.max_entity_groups_per_txn,
        );
        let indexes = IndexManager::new();
        let index_cache = Arc::new(KindIndexCache::new());
        indexes.add_listener(index_cache.clone());

        let datastore = Self {
            auto_id_policy: RwLock::new(config.auto_id_policy),
            config,
            manager,
            indexes,
            index_cache,
            pseudo_kinds: RwLock::new(HashMap::new()),
        };
        datastore.register_pseudo_kind(Arc::new(entity_group_kind));
        datastore
    }

    /// Returns the configuration the datastore was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The transaction manager.
    #[must_use]
    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// The composite index registry.
    #[must_use]
    pub fn index_manager(&self) -> &IndexManager {
        &self.indexes
    }

    /// Returns a snapshot of the statistics.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.manager.stats().snapshot()
    }

    /// Registers a pseudo kind, replacing any kind of the same name.
    pub fn register_pseudo_kind(&self, kind: Arc<dyn PseudoKind>) {
        self.pseudo_kinds.write().insert(kind.name().to_string(), kind);
    }

    fn pseudo_kind(&self, kind: &str) -> Option<Arc<dyn PseudoKind>> {
        self.pseudo_kinds.read().get(kind).cloned()
    }

    /// Current auto id policy.
    #[must_use]
    pub fn auto_id_policy(&self) -> AutoIdPolicy {
        *self.auto_id_policy.read()
    }

    /// Changes how incomplete keys are completed on put.
    pub fn set_auto_id_policy(&self, policy: AutoIdPolicy) {
        *self.auto_id_policy.write() = policy;
    }

    /// Flushes pending applies, then switches the consistency policy.
    ///
    /// # Errors
    ///
    /// Propagates flush failures.
    pub fn set_consistency_policy(&self, policy: ConsistencyPolicy) -> CoreResult<()> {
        self.manager.set_consistency_policy(policy)
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begins an explicit transaction for `app`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` when the caller may not act for `app`, or for a
    /// cross-group transaction under master/slave consistency.
    pub fn begin_transaction(
        &self,
        app: &str,
        allow_multiple_eg: bool,
        caller: &Caller,
    ) -> CoreResult<TransactionHandle> {
        caller.check_app(app)?;
        Ok(self.manager.begin_transaction(app, allow_multiple_eg)?.handle())
    }

    /// Commits an explicit transaction and returns its write cost.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for an unknown handle and the errors of
    /// [`LiveTxn::commit`].
    pub fn commit(&self, handle: &TransactionHandle, caller: &Caller) -> CoreResult<Cost> {
        self.manager.get_txn(handle, caller)?.commit()
    }

    /// Rolls an explicit transaction back.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for an unknown handle.
    pub fn rollback(&self, handle: &TransactionHandle, caller: &Caller) -> CoreResult<()> {
        self.manager.get_txn(handle, caller)?.rollback()
    }

    /// Queues actions that fire once the transaction commits.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for an unknown handle or when the transaction
    /// would exceed the configured action limit.
    pub fn add_actions(
        &self,
        handle: &TransactionHandle,
        actions: Vec<Action>,
        caller: &Caller,
    ) -> CoreResult<()> {
        self.manager
            .get_txn(handle, caller)?
            .add_actions(actions, Some(self.config.max_actions_per_txn))
    }

    /// Runs `f` in an explicit transaction and commits it.
    ///
    /// If `f` or the commit fails the transaction is rolled back; conflicts
    /// start over in a new transaction as configured by the retry policy.
    ///
    /// # Errors
    ///
    /// Returns the error of `f` or of the commit once retries are exhausted.
    pub fn run_in_transaction<T, F>(
        &self,
        app: &str,
        allow_multiple_eg: bool,
        caller: &Caller,
        mut f: F,
    ) -> CoreResult<T>
    where
        F: FnMut(&Self, &TransactionHandle) -> CoreResult<T>,
    {
        self.with_retries(app, || {
            let handle = self.begin_transaction(app, allow_multiple_eg, caller)?;
            let outcome = f(self, &handle).and_then(|value| {
                self.commit(&handle, caller)?;
                Ok(value)
            });
            if outcome.is_err() {
                if let Ok(txn) = self.manager.get_txn(&handle, caller) {
                    txn.rollback_if_open();
                }
            }
            outcome
        })
    }

    fn with_retries<T>(&self, app: &str, mut attempt: impl FnMut() -> CoreResult<T>) -> CoreResult<T> {
        let retry = self.config.retry;
        let mut retries = 0;
        let mut delay = retry.initial_delay;
        loop {
            match attempt() {
                Err(err) if err.is_retryable() && retries < retry.max_retries => {
                    retries += 1;
                    self.manager.stats().record_retry();
                    warn!(
                        app,
                        retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying transaction after conflict"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    delay = retry.next_delay(delay);
                }
                outcome => return outcome,
            }
        }
    }

    /// Runs `op` on every value in one implicit transaction and commits it.
    fn run_in_txn<V>(
        &self,
        app: &str,
        values: &[V],
        mut op: impl FnMut(&LiveTxn, &V) -> CoreResult<()>,
    ) -> CoreResult<ImplicitTxn> {
        self.with_retries(app, || {
            let txn = ImplicitTxn(self.manager.begin_implicit(app));
            for value in values {
                op(&txn, value)?;
            }
            txn.commit()?;
            Ok(txn)
        })
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Looks up `keys`, returning one [`Lookup`] per key in order.
    ///
    /// With `transaction` the reads use that transaction's snapshots. With
    /// `eventual_consistency` and no transaction the datastore grooms and
    /// reads applied data only. Otherwise each entity group is read in its
    /// own implicit transaction, which sees every commit.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for incomplete keys, keys of another app or an
    /// unknown transaction, plus transaction errors.
    pub fn get(
        &self,
        keys: &[Key],
        transaction: Option<&TransactionHandle>,
        eventual_consistency: bool,
        caller: &Caller,
    ) -> CoreResult<Vec<Lookup>> {
        for key in keys {
            check_key(caller, key, true)?;
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        if transaction.is_none() && eventual_consistency {
            self.manager.groom()?;
            return keys
                .iter()
                .map(|key| self.lookup(None, key, true))
                .collect();
        }

        if let Some(handle) = transaction {
            let txn = self.manager.get_txn(handle, caller)?;
            return keys
                .iter()
                .map(|key| self.lookup(Some(txn.as_ref()), key, eventual_consistency))
                .collect();
        }

        let mut grouped: BTreeMap<EntityGroupKey, Vec<(Key, usize)>> = BTreeMap::new();
        for (i, key) in keys.iter().enumerate() {
            grouped.entry(group_of(key)?).or_default().push((key.clone(), i));
        }
        let mut lookups: Vec<Option<Lookup>> = vec![None; keys.len()];
        for (group, values) in &grouped {
            self.run_in_txn(group.app(), values, |txn, (key, i)| {
                lookups[*i] = Some(self.lookup(Some(txn), key, false)?);
                Ok(())
            })?;
        }
        lookups
            .into_iter()
            .map(|lookup| lookup.ok_or_else(|| CoreError::internal("key was not looked up")))
            .collect()
    }

    fn lookup(&self, txn: Option<&LiveTxn>, key: &Key, eventual_consistency: bool) -> CoreResult<Lookup> {
        if let Some(kind) = self.pseudo_kind(key.kind()) {
            return Ok(Lookup {
                entity: kind.get(&self.manager, txn, key)?,
                version: None,
            });
        }
        let record = match txn {
            Some(txn) => txn.get(key)?,
            None => self.manager.backend().get(key)?,
        };
        Ok(match record {
            Some(record) => Lookup {
                version: record.version(),
                entity: Some(record.entity),
            },
            None => Lookup {
                entity: None,
                version: (!eventual_consistency).then(|| self.manager.read_timestamp()),
            },
        })
    }

    /// Writes `entities`.
    ///
    /// Entities whose key lacks an id get one from the auto id policy and
    /// are written as inserts. Without `transaction` every entity group is
    /// committed in its own implicit transaction and the new versions are
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for invalid keys, keys of another app or an
    /// unknown transaction, plus transaction errors.
    pub fn put(
        &self,
        entities: Vec<Entity>,
        transaction: Option<&TransactionHandle>,
        caller: &Caller,
    ) -> CoreResult<Mutation> {
        for entity in &entities {
            check_key(caller, &entity.key, false)?;
        }
        let txn = transaction
            .map(|handle| self.manager.get_txn(handle, caller))
            .transpose()?;

        let mut mutation = Mutation::default();
        let mut grouped: BTreeMap<EntityGroupKey, Vec<(Entity, bool)>> = BTreeMap::new();
        for mut entity in entities {
            let insert = !entity.key.is_complete();
            if insert {
                self.complete_key(&mut entity.key)?;
            }
            mutation.keys.push(entity.key.clone());
            grouped
                .entry(group_of(&entity.key)?)
                .or_default()
                .push((entity, insert));
        }

        if let Some(txn) = txn {
            for (entity, insert) in grouped.into_values().flatten() {
                let indexes = self.indexes_for(&entity.key);
                txn.put(entity, insert, indexes)?;
            }
            mutation.versions = vec![None; mutation.keys.len()];
            return Ok(mutation);
        }

        let mut versions: HashMap<Key, Option<u64>> = HashMap::new();
        for (group, values) in &grouped {
            let txn = self.run_in_txn(group.app(), values, |txn, (entity, insert)| {
                txn.put(entity.clone(), *insert, self.indexes_for(&entity.key))
            })?;
            for (entity, _) in values {
                versions.insert(entity.key.clone(), txn.mutation_version(&entity.key)?);
            }
            mutation.cost.merge(txn.cost());
        }
        mutation.versions = mutation
            .keys
            .iter()
            .map(|key| versions.get(key).copied().flatten())
            .collect();
        Ok(mutation)
    }

    /// Deletes `keys`. Deleting a missing entity is not an error.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for incomplete keys, keys of another app or an
    /// unknown transaction, plus transaction errors.
    pub fn delete(
        &self,
        keys: &[Key],
        transaction: Option<&TransactionHandle>,
        caller: &Caller,
    ) -> CoreResult<Mutation> {
        for key in keys {
            check_key(caller, key, true)?;
        }
        let mut mutation = Mutation {
            keys: keys.to_vec(),
            ..Mutation::default()
        };

        if let Some(handle) = transaction {
            let txn = self.manager.get_txn(handle, caller)?;
            for key in keys {
                txn.delete(key.clone(), self.indexes_for(key))?;
            }
            mutation.versions = vec![None; keys.len()];
            return Ok(mutation);
        }

        let mut grouped: BTreeMap<EntityGroupKey, Vec<(Key, usize)>> = BTreeMap::new();
        for (i, key) in keys.iter().enumerate() {
            grouped.entry(group_of(key)?).or_default().push((key.clone(), i));
        }
        mutation.versions = vec![None; keys.len()];
        for (group, values) in &grouped {
            let txn = self.run_in_txn(group.app(), values, |txn, (key, _)| {
                txn.delete(key.clone(), self.indexes_for(key))
            })?;
            for (key, i) in values {
                mutation.versions[*i] = txn.mutation_version(key)?;
            }
            mutation.cost.merge(txn.cost());
        }
        Ok(mutation)
    }

    /// Applies every outstanding write of the entity groups of `keys`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for keys of another app, plus transaction
    /// errors.
    pub fn touch(&self, keys: &[Key], caller: &Caller) -> CoreResult<()> {
        let mut grouped: BTreeMap<EntityGroupKey, Vec<Key>> = BTreeMap::new();
        for key in keys {
            check_key(caller, key, true)?;
            grouped.entry(group_of(key)?).or_default().push(key.clone());
        }
        for (group, values) in &grouped {
            self.run_in_txn(group.app(), values, |txn, key| {
                txn.entity_group_read_position(key).map(drop)
            })?;
        }
        Ok(())
    }

    fn complete_key(&self, key: &mut Key) -> CoreResult<()> {
        let backend = self.manager.backend();
        match self.auto_id_policy() {
            AutoIdPolicy::Sequential => {
                let (id, _) = backend.allocate_sequential_ids(key, IdAllocation::Size(1))?;
                if let Some(last) = key.last_mut() {
                    last.id_or_name = Some(IdOrName::Id(id));
                }
            }
            AutoIdPolicy::Scattered => {
                *key = backend
                    .allocate_ids(vec![key.clone()])?
                    .into_iter()
                    .next()
                    .ok_or_else(|| CoreError::internal(format!("no id allocated for {key}")))?;
            }
        }
        debug!(key = %key, "allocated id");
        Ok(())
    }

    fn indexes_for(&self, key: &Key) -> Vec<CompositeIndex> {
        self.index_cache.get_or_load(&key.app, key.kind(), || {
            self.indexes
                .get_indexes(&key.app, &Caller::trusted(key.app.clone()))
                .unwrap_or_default()
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Runs `query` and returns a cursor over its results.
    ///
    /// Transactional queries read the transaction's snapshot of the
    /// ancestor group. Other ancestor queries read a fresh snapshot, which
    /// sees every commit. Everything else grooms and then reads applied
    /// data only.
    ///
    /// # Errors
    ///
    /// - `BadRequest` for invalid queries, a caller of another app, or a
    ///   transactional query on a pseudo kind
    /// - `NeedIndex` when indexes are required and no serving composite
    ///   index covers the query
    pub fn get_query_cursor(&self, query: &Query, caller: &Caller) -> CoreResult<ListCursor> {
        caller.check_app(&query.app)?;
        query.validate()?;
        let pseudo = query.kind.as_deref().and_then(|kind| self.pseudo_kind(kind));

        let required = required_index(query);
        if self.config.require_indexes && pseudo.is_none() {
            if let Some(required) = &required {
                let serving = self.indexes.serving_indexes(&query.app);
                if !serving.iter().any(|index| required.is_satisfied_by(&index.definition)) {
                    return Err(CoreError::need_index(format!(
                        "This query requires a composite index that is not defined.\n\
                         The following index is the minimum index required:\n{}",
                        describe_index(&required.definition())
                    )));
                }
            }
        }
        let index_list: Vec<CompositeIndex> = required
            .map(|required| {
                CompositeIndex::new(query.app.clone(), required.definition())
                    .with_state(IndexState::ReadWrite)
            })
            .into_iter()
            .collect();

        if let Some(handle) = &query.transaction {
            if pseudo.is_some() {
                return Err(CoreError::bad_request(format!(
                    "transactional queries on \"{}\" not allowed",
                    query.kind_name()
                )));
            }
            let txn = self.manager.get_txn(handle, caller)?;
            return txn.get_query_cursor(query, index_list, &self.config);
        }

        if query.ancestor.is_some() && pseudo.is_none() {
            let txn = ImplicitTxn(self.manager.begin_implicit(&query.app));
            return txn.get_query_cursor(query, index_list, &self.config);
        }

        self.manager.groom()?;
        if let Some(pseudo) = pseudo {
            return pseudo.query(query);
        }
        let records = self
            .manager
            .backend()
            .scan(&query.app, &query.namespace, query.kind_name())?;
        execute(records, query, index_list, &self.config)
    }

    // ========================================================================
    // Indexes and ids
    // ========================================================================

    /// Creates a composite index and returns its id.
    ///
    /// # Errors
    ///
    /// See [`IndexManager::create_index`].
    pub fn create_index(&self, index: CompositeIndex, caller: &Caller) -> CoreResult<u64> {
        self.indexes.create_index(index, caller)
    }

    /// Moves a composite index to a new state.
    ///
    /// # Errors
    ///
    /// See [`IndexManager::update_index`].
    pub fn update_index(&self, index: &CompositeIndex, caller: &Caller) -> CoreResult<()> {
        self.indexes.update_index(index, caller)
    }

    /// Deletes a composite index.
    ///
    /// # Errors
    ///
    /// See [`IndexManager::delete_index`].
    pub fn delete_index(&self, index: &CompositeIndex, caller: &Caller) -> CoreResult<()> {
        self.indexes.delete_index(index, caller)
    }

    /// Returns every composite index of `app`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` when the caller may not read `app`'s indexes.
    pub fn get_indexes(&self, app: &str, caller: &Caller) -> CoreResult<Vec<CompositeIndex>> {
        self.indexes.get_indexes(app, caller)
    }

    /// Reserves sequential ids in the space of `key` and returns the
    /// inclusive range.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for a key of another app and storage errors for
    /// invalid requests.
    pub fn allocate_sequential_ids(
        &self,
        key: &Key,
        request: IdAllocation,
        caller: &Caller,
    ) -> CoreResult<(i64, i64)> {
        check_key(caller, key, false)?;
        Ok(self.manager.backend().allocate_sequential_ids(key, request)?)
    }

    /// Completes incomplete keys with scattered ids and reserves the ids of
    /// complete ones. Returns the completed keys only.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for keys of another app and storage errors when
    /// an id space is exhausted.
    pub fn allocate_ids(&self, keys: Vec<Key>, caller: &Caller) -> CoreResult<Vec<Key>> {
        for key in &keys {
            check_key(caller, key, false)?;
        }
        Ok(self.manager.backend().allocate_ids(keys)?)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Applies every pending transaction.
    ///
    /// # Errors
    ///
    /// Propagates apply failures.
    pub fn write(&self) -> CoreResult<()> {
        self.manager.flush()
    }

    /// Writes everything pending before the datastore goes away.
    ///
    /// # Errors
    ///
    /// Propagates apply failures.
    pub fn close(&self) -> CoreResult<()> {
        self.write()
    }

    /// Drops all data, metadata, transactions and indexes.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn clear(&self) -> CoreResult<()> {
        self.manager.clear();
        self.indexes.clear();
        self.manager.backend().clear()?;
        Ok(())
    }
}

fn group_of(key: &Key) -> CoreResult<EntityGroupKey> {
    key.entity_group()
        .map_err(|e| CoreError::bad_request(e.to_string()))
}

/// Checks app ownership and key shape. Ancestors must always be complete.
fn check_key(caller: &Caller, key: &Key, require_id_or_name: bool) -> CoreResult<()> {
    caller.check_app(&key.app)?;
    let Some((last, ancestors)) = key.path.split_last() else {
        return Err(CoreError::bad_request("key's path cannot be empty"));
    };
    if !ancestors.iter().all(PathElement::is_complete) || (require_id_or_name && !last.is_complete()) {
        return Err(CoreError::bad_request("missing key id/name"));
    }
    Ok(())
}

fn describe_index(definition: &IndexDefinition) -> String {
    let mut text = format!("- kind: {}\n", definition.kind);
    if definition.ancestor {
        text.push_str("  ancestor: yes\n");
    }
    if !definition.properties.is_empty() {
        text.push_str("  properties:\n");
        for property in &definition.properties {
            let _ = writeln!(text, "  - name: {}", property.name);
            let _ = writeln!(text, "    direction: {}", property.direction);
        }
    }
    text
}
