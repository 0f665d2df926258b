//! Field encryption with the session key.

use enclave_crypto::{aead, EncryptedField, MasterKey};
use enclave_storage::{SecretDraft, SecretRecord};
use zeroize::Zeroizing;

use crate::error::KeyringError;

/// Encrypts and decrypts fields under the unlocked master key.
///
/// Obtained from [`crate::KeyManager::cipher`]. It borrows the manager, so
/// no field cipher can be alive while the manager is borrowed mutably for a
/// logout or a master-password change.
#[derive(Clone, Copy)]
pub struct FieldCipher<'a> {
    key: &'a MasterKey,
}

impl<'a> FieldCipher<'a> {
    pub(crate) fn new(key: &'a MasterKey) -> Self {
        Self { key }
    }

    /// Encrypts a plaintext field.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedField, KeyringError> {
        Ok(aead::encrypt(plaintext, self.key)?)
    }

    /// Decrypts a field.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Corrupted`] if the field does not decrypt.
    pub fn decrypt(&self, field: &EncryptedField) -> Result<Zeroizing<String>, KeyringError> {
        Ok(aead::decrypt(field, self.key)?)
    }

    /// Seals a draft into a storable record with a fresh identifier.
    pub fn seal(&self, draft: SecretDraft) -> Result<SecretRecord, KeyringError> {
        draft.seal(|plaintext| self.encrypt(plaintext))
    }

    /// Decrypts every sensitive field of a record.
    pub fn reveal(&self, record: &SecretRecord) -> Result<SecretDraft, KeyringError> {
        record.reveal(|field| self.decrypt(field))
    }
}

impl std::fmt::Debug for FieldCipher<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}
