//! Pseudo kinds: read-only kinds computed from engine metadata.

use crate::clock::Clock;
use crate::cursor::ListCursor;
use crate::error::{CoreError, CoreResult};
use crate::query::Query;
use crate::transaction::{LiveTxn, TransactionManager};
use egstore_storage::{Entity, Key};
use std::fmt::Debug;

/// Name of the entity group pseudo kind.
pub const ENTITY_GROUP_KIND: &str = "__entity_group__";

/// Name of the version property of entity group pseudo entities.
pub const VERSION_PROPERTY: &str = "__version__";

/// A kind whose entities are synthesized instead of stored.
///
/// Keys of a pseudo kind are resolved through [`PseudoKind::get`] instead of
/// the backend. Transactional queries on pseudo kinds are rejected by the
/// datastore before they reach the kind.
pub trait PseudoKind: Send + Sync + Debug {
    /// Kind name.
    fn name(&self) -> &str;

    /// Synthesizes the entity for `key`, or `None` if it does not exist.
    ///
    /// Without `txn` the kind runs its own short-lived transaction.
    ///
    /// # Errors
    ///
    /// Propagates transaction failures.
    fn get(
        &self,
        manager: &TransactionManager,
        txn: Option<&LiveTxn>,
        key: &Key,
    ) -> CoreResult<Option<Entity>>;

    /// Runs a query on the kind.
    ///
    /// # Errors
    ///
    /// The default rejects every query with `BadRequest`.
    fn query(&self, _query: &Query) -> CoreResult<ListCursor> {
        Err(CoreError::bad_request(format!(
            "queries not supported on {}",
            self.name()
        )))
    }
}

/// Exposes the version of an entity group as the entity `root/__entity_group__:1`.
///
/// The version is the group's log position as seen by the transaction plus
/// a base fixed when the kind is created, so versions keep growing across
/// restarts of the engine. Under master/slave consistency no entity exists.
#[derive(Debug, Clone, Copy)]
pub struct EntityGroupPseudoKind {
    base_version: i64,
}

impl EntityGroupPseudoKind {
    /// Creates the kind, taking the base version from `clock` in microseconds.
    pub fn new(clock: &dyn Clock) -> Self {
        let micros = clock.now_ms().saturating_mul(1000);
        Self {
            base_version: i64::try_from(micros).unwrap_or(i64::MAX),
        }
    }

    /// Base added to every group read position.
    #[must_use]
    pub fn base_version(&self) -> i64 {
        self.base_version
    }
}

impl PseudoKind for EntityGroupPseudoKind {
    fn name(&self) -> &str {
        ENTITY_GROUP_KIND
    }

    fn get(
        &self,
        manager: &TransactionManager,
        txn: Option<&LiveTxn>,
        key: &Key,
    ) -> CoreResult<Option<Entity>> {
        let Some(txn) = txn else {
            let implicit = manager.begin_implicit(&key.app);
            let result = self.get(manager, Some(&implicit), key);
            implicit.rollback_if_open();
            return result;
        };

        if manager.is_master_slave() {
            return Ok(None);
        }
        if key.path.len() != 2 || key.last().and_then(|e| e.id()) != Some(1) {
            return Ok(None);
        }

        let read_pos = txn.entity_group_read_position(key)?;
        let version = read_pos.saturating_add(self.base_version);
        Ok(Some(Entity::new(key.clone()).with(VERSION_PROPERTY, version)))
    }
}
