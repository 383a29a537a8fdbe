//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An insert targeted a key that is already stored.
    #[error("entity already exists: {key}")]
    AlreadyExists {
        /// Debug rendering of the offending key.
        key: String,
    },

    /// A request argument was out of range or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The stored data is inconsistent.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
