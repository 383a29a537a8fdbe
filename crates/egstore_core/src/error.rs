//! Error types for egstore core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in egstore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] egstore_storage::StorageError),

    /// A compiled cursor could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The request is malformed or not allowed.
    #[error("bad request: {message}")]
    BadRequest {
        /// Description of the problem.
        message: String,
    },

    /// Optimistic concurrency validation failed. Always retryable.
    #[error("concurrent transaction: {message}")]
    ConcurrentTransaction {
        /// Description of the conflict.
        message: String,
    },

    /// An engine invariant was violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },

    /// The query needs a composite index that is not serving.
    #[error("need index: {message}")]
    NeedIndex {
        /// Description of the missing index.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates a concurrent transaction error.
    pub fn concurrent_transaction(message: impl Into<String>) -> Self {
        Self::ConcurrentTransaction {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a need index error.
    pub fn need_index(message: impl Into<String>) -> Self {
        Self::NeedIndex {
            message: message.into(),
        }
    }

    /// Returns true if retrying the operation in a new transaction may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentTransaction { .. })
    }

    /// Returns true for request validation failures.
    #[must_use]
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest { .. })
    }
}
