//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store could not be opened or reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A read or write against the backing store failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Caller supplied an unusable key, profile name, etc.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
