//! Keyring error types.

use enclave_crypto::CryptoError;
use enclave_storage::StorageError;
use thiserror::Error;

/// Errors that can occur during key management.
#[derive(Debug, Error)]
pub enum KeyringError {
    /// Encryption or decryption attempted while the vault is locked.
    #[error("vault is locked: unlock it with the master password")]
    KeyNotInitialized,

    /// No master password has been set yet.
    #[error("no master password has been set")]
    NotInitialized,

    /// A master password is already set.
    #[error("master password already set")]
    AlreadyInitialized,

    /// The supplied password is empty.
    #[error("master password cannot be empty")]
    EmptyPassword,

    /// A field failed to decrypt under the session key.
    ///
    /// Tag mismatches and undecodable fields both end up here: the data is
    /// corrupted, or was written under another key.
    #[error("data corrupted or wrong key: {0}")]
    Corrupted(String),

    /// A master-password change was interrupted and must be recovered first.
    #[error("an interrupted master-password change must be recovered first")]
    RekeyPending,

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl From<StorageError> for KeyringError {
    fn from(e: StorageError) -> Self {
        KeyringError::Storage(e.to_string())
    }
}

impl From<CryptoError> for KeyringError {
    fn from(e: CryptoError) -> Self {
        if e.is_undecryptable() {
            KeyringError::Corrupted(e.to_string())
        } else {
            KeyringError::Crypto(e.to_string())
        }
    }
}
