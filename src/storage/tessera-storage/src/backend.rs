//! Storage backend trait definition.

use async_trait::async_trait;

use crate::error::StorageError;

/// A string key/value store holding session material.
///
/// Implementations must treat a missing key as `Ok(None)` and removing a
/// missing key as a no-op.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Get the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Check if a key exists.
    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Returns the name of this backend for logging.
    fn name(&self) -> &'static str;
}
