//! Shared handle to the key manager.

use std::sync::Arc;

use enclave_crypto::{EncryptedField, MasterPassword};
use enclave_storage::StorageBackend;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use zeroize::Zeroizing;

use crate::error::KeyringError;
use crate::{KeyManager, KeyStatus};

/// A cloneable handle to one [`KeyManager`].
///
/// Field encryption runs under the read lock, so any number of callers can
/// encrypt and decrypt concurrently. Anything that changes the key (unlock,
/// logout, a master-password change) needs the write lock and therefore
/// waits for every in-flight field operation to finish.
pub struct VaultSession<S: StorageBackend> {
    inner: Arc<RwLock<KeyManager<S>>>,
}

impl<S: StorageBackend> Clone for VaultSession<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: StorageBackend> VaultSession<S> {
    /// Wraps a key manager.
    pub fn new(manager: KeyManager<S>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(manager)),
        }
    }

    /// Shared access to the manager.
    pub async fn read(&self) -> RwLockReadGuard<'_, KeyManager<S>> {
        self.inner.read().await
    }

    /// Exclusive access to the manager.
    pub async fn write(&self) -> RwLockWriteGuard<'_, KeyManager<S>> {
        self.inner.write().await
    }

    /// Returns the current state.
    pub async fn status(&self) -> KeyStatus {
        self.inner.read().await.status()
    }

    /// Returns true if the master key is in memory.
    pub async fn is_unlocked(&self) -> bool {
        self.inner.read().await.is_unlocked()
    }

    /// Unlocks the vault with `password`.
    pub async fn unlock(&self, password: MasterPassword) -> Result<bool, KeyringError> {
        self.inner.write().await.verify(password).await
    }

    /// Locks the vault.
    pub async fn logout(&self) -> Result<(), KeyringError> {
        self.inner.write().await.logout().await
    }

    /// Encrypts a field under the session key.
    pub async fn encrypt_field(&self, plaintext: &str) -> Result<EncryptedField, KeyringError> {
        self.inner.read().await.encrypt_field(plaintext)
    }

    /// Decrypts a field with the session key.
    pub async fn decrypt_field(
        &self,
        field: &EncryptedField,
    ) -> Result<Zeroizing<String>, KeyringError> {
        self.inner.read().await.decrypt_field(field)
    }
}
