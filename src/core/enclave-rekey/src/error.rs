//! Rekey error types.

use enclave_keyring::KeyringError;
use enclave_storage::StorageError;
use thiserror::Error;

/// Errors returned by a master-password change or its recovery.
#[derive(Debug, Error)]
pub enum RekeyError {
    /// Nothing was changed; the old password still unlocks every record.
    #[error("master-password change aborted: {0}")]
    Aborted(AbortReason),

    /// The change stopped after the journal was written.
    ///
    /// The vault refuses to unlock until [`crate::VaultRekeyCoordinator::recover`]
    /// has run.
    #[error("master-password change interrupted, recovery required: {0}")]
    Partial(String),

    /// The password matches neither side of an interrupted change.
    #[error("password matches neither the old nor the new master password")]
    WrongPassword,
}

/// Why a master-password change was aborted.
#[derive(Debug, Error)]
pub enum AbortReason {
    /// The current password did not verify.
    #[error("wrong password")]
    WrongPassword,

    /// The new password is empty.
    #[error("new password cannot be empty")]
    EmptyPassword,

    /// An earlier change was interrupted and has not been recovered.
    #[error("an interrupted change must be recovered first")]
    RekeyPending,

    /// A record field did not decrypt under the current key.
    #[error("record {record_id}: field {field} cannot be decrypted")]
    Undecryptable {
        /// Record identifier.
        record_id: String,
        /// Field name.
        field: &'static str,
    },

    /// The vault was locked when the change started.
    #[error("vault is locked")]
    Locked,

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Key manager error.
    #[error("keyring error: {0}")]
    Keyring(String),
}

impl From<KeyringError> for AbortReason {
    fn from(e: KeyringError) -> Self {
        match e {
            KeyringError::RekeyPending => AbortReason::RekeyPending,
            KeyringError::EmptyPassword => AbortReason::EmptyPassword,
            KeyringError::KeyNotInitialized => AbortReason::Locked,
            KeyringError::Storage(msg) => AbortReason::Storage(msg),
            other => AbortReason::Keyring(other.to_string()),
        }
    }
}

impl From<StorageError> for AbortReason {
    fn from(e: StorageError) -> Self {
        AbortReason::Storage(e.to_string())
    }
}

impl From<AbortReason> for RekeyError {
    fn from(reason: AbortReason) -> Self {
        RekeyError::Aborted(reason)
    }
}
