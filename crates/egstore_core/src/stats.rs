//! Datastore statistics.
//!
//! Counters are shared by the transaction manager and the facade and can be
//! read while operations are in progress.
//!
//! # Usage
//!
//! ```rust
//! use egstore_core::{Datastore, Config};
//!
//! let datastore = Datastore::in_memory(Config::default());
//! let stats = datastore.stats();
//! println!("committed: {}", stats.transactions_committed);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Datastore statistics and metrics.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct DatastoreStats {
    // Transaction counters
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    conflicts: AtomicU64,
    retries: AtomicU64,

    // Apply pipeline
    applies: AtomicU64,
    grooms: AtomicU64,
    flushes: AtomicU64,

    // Writes
    entity_writes: AtomicU64,
    index_writes: AtomicU64,
    noop_writes: AtomicU64,

    // Actions
    actions_enqueued: AtomicU64,
    actions_dropped: AtomicU64,
}

impl DatastoreStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_apply(&self) {
        self.applies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_groom(&self) {
        self.grooms.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_writes(&self, entity_writes: u64, index_writes: u64) {
        self.entity_writes
            .fetch_add(entity_writes, Ordering::Relaxed);
        self.index_writes.fetch_add(index_writes, Ordering::Relaxed);
    }

    pub(crate) fn record_noop_write(&self) {
        self.noop_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_action(&self, delivered: bool) {
        if delivered {
            self.actions_enqueued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.actions_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the total number of transactions started.
    pub fn transactions_started(&self) -> u64 {
        self.transactions_started.load(Ordering::Relaxed)
    }

    /// Returns the total number of transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the total number of transactions rolled back.
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns the number of commits rejected by concurrency validation.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Returns the number of implicit transaction retries.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Returns the number of per-group applies.
    pub fn applies(&self) -> u64 {
        self.applies.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started(),
            transactions_committed: self.transactions_committed(),
            transactions_rolled_back: self.transactions_rolled_back(),
            conflicts: self.conflicts(),
            retries: self.retries(),
            applies: self.applies(),
            grooms: self.grooms.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            entity_writes: self.entity_writes.load(Ordering::Relaxed),
            index_writes: self.index_writes.load(Ordering::Relaxed),
            noop_writes: self.noop_writes.load(Ordering::Relaxed),
            actions_enqueued: self.actions_enqueued.load(Ordering::Relaxed),
            actions_dropped: self.actions_dropped.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of datastore statistics.
///
/// Unlike `DatastoreStats`, this is a plain struct that can be serialized,
/// compared, or passed across threads without atomics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Transactions started, implicit ones included.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions rolled back, empty commits included.
    pub transactions_rolled_back: u64,
    /// Commits or snapshots rejected by concurrency validation.
    pub conflicts: u64,
    /// Implicit transaction retries.
    pub retries: u64,
    /// Per-group applies into the backend.
    pub applies: u64,
    /// Groom passes.
    pub grooms: u64,
    /// Flush passes.
    pub flushes: u64,
    /// Entity writes charged to committed transactions.
    pub entity_writes: u64,
    /// Index row writes charged to committed transactions.
    pub index_writes: u64,
    /// Puts and deletes that left the stored entity unchanged.
    pub noop_writes: u64,
    /// Actions handed to the action sink.
    pub actions_enqueued: u64,
    /// Actions the sink refused.
    pub actions_dropped: u64,
}
