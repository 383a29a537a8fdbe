//! Side actions fired after a successful commit.
//!
//! A transaction may queue actions (typically task enqueues). They are handed
//! to the configured [`ActionSink`] only once the commit has succeeded, and a
//! sink failure never undoes the commit.

use crate::error::CoreResult;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A deferred side effect queued by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Destination queue.
    pub queue: String,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl Action {
    /// Creates an action for `queue`.
    pub fn new(queue: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            queue: queue.into(),
            payload: payload.into(),
        }
    }
}

/// Receiver of committed transaction actions.
pub trait ActionSink: Send + Sync + Debug {
    /// Delivers one action.
    ///
    /// # Errors
    ///
    /// Errors are logged by the engine and the action is dropped.
    fn enqueue(&self, action: &Action) -> CoreResult<()>;
}

/// A sink that accepts and forgets every action.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardActions;

impl ActionSink for DiscardActions {
    fn enqueue(&self, _action: &Action) -> CoreResult<()> {
        Ok(())
    }
}
