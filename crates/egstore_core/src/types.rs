//! Core type definitions for egstore.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle of a registered transaction.
///
/// A handle is only valid for the app that began the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHandle {
    /// App that owns the transaction.
    pub app: String,
    /// Numeric transaction id. Ids are never reused within a process.
    pub handle: u64,
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}@{}", self.handle, self.app)
    }
}

/// Identity of the party issuing a request.
///
/// Untrusted callers may only touch data of their own app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// The calling app.
    pub app: String,
    /// Whether the caller may act on behalf of other apps.
    pub trusted: bool,
}

impl Caller {
    /// Creates an untrusted caller for `app`.
    pub fn app(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            trusted: false,
        }
    }

    /// Creates a trusted caller.
    pub fn trusted(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            trusted: true,
        }
    }

    /// Checks that this caller may access data owned by `app`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` when an untrusted caller targets another app.
    pub fn check_app(&self, app: &str) -> CoreResult<()> {
        if self.trusted || self.app == app {
            Ok(())
        } else {
            Err(CoreError::bad_request(format!(
                "app {} cannot access app {}'s data",
                self.app, app
            )))
        }
    }
}

/// Write cost of a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cost {
    /// Number of entity writes.
    pub entity_writes: u64,
    /// Number of index row writes.
    pub index_writes: u64,
}

impl Cost {
    /// Adds the given writes to this cost.
    pub fn add(&mut self, entity_writes: u64, index_writes: u64) {
        self.entity_writes += entity_writes;
        self.index_writes += index_writes;
    }

    /// Adds another cost to this one.
    pub fn merge(&mut self, other: Cost) {
        self.add(other.entity_writes, other.index_writes);
    }
}

/// Sort direction of a query order or an index property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Smallest value first.
    Ascending,
    /// Largest value first.
    Descending,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "asc"),
            Self::Descending => write!(f, "desc"),
        }
    }
}
