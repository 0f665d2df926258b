//! Key/value settings backend.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;

/// Storage backend trait for the vault settings store.
///
/// Holds small, non-secret values such as the KDF salt and the verification
/// token. Never holds key material or plaintext.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Get a value by key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Put a value with a key.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a value by key.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Check if a key exists.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[async_trait]
impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        (**self).put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        (**self).delete(key).await
    }
}
