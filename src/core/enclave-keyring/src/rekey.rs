//! Staging hooks for a master-password change.
//!
//! A change is journaled in the settings store: the new verification token
//! is first written under [`keys::REKEY_PENDING`] and only promoted to
//! [`keys::VERIFICATION_TEXT`] once every record has been rewritten. While
//! the marker exists the vault refuses to unlock, and the password that
//! was supplied tells a recovery which side of the change it is on.

use enclave_crypto::{aead, EncryptedField, KdfParams, MasterKey, MasterPassword};
use enclave_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cipher::FieldCipher;
use crate::error::KeyringError;
use crate::{derive, keys, token_matches, KeyManager, VERIFICATION_PLAINTEXT};

/// Journal marker of an in-flight master-password change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRekey {
    /// Verification token under the new key.
    pub verification_text: EncryptedField,
    /// Parameters the new key was derived with.
    pub kdf_params: KdfParams,
}

/// A key derived from the new password, not yet committed.
pub struct StagedKey {
    key: MasterKey,
    params: KdfParams,
    token: EncryptedField,
}

impl StagedKey {
    /// Returns a cipher over the staged key.
    pub fn cipher(&self) -> FieldCipher<'_> {
        FieldCipher::new(&self.key)
    }

    /// Returns the parameters the staged key was derived with.
    pub fn params(&self) -> KdfParams {
        self.params
    }

    fn pending(&self) -> PendingRekey {
        PendingRekey {
            verification_text: self.token.clone(),
            kdf_params: self.params,
        }
    }
}

impl std::fmt::Debug for StagedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedKey")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Which side of an interrupted change a password belongs to.
#[derive(Debug)]
pub enum RekeyIdentity {
    /// The password being changed to.
    New(MasterKey),
    /// The password being changed from.
    Old(MasterKey),
    /// Neither.
    Unknown,
}

impl RekeyIdentity {
    /// Returns a cipher over the derived key, if the password was recognized.
    pub fn cipher(&self) -> Option<FieldCipher<'_>> {
        match self {
            RekeyIdentity::New(key) | RekeyIdentity::Old(key) => Some(FieldCipher::new(key)),
            RekeyIdentity::Unknown => None,
        }
    }
}

impl<S: StorageBackend> KeyManager<S> {
    /// Returns the journal marker, if a change is in flight.
    pub async fn pending_rekey(&self) -> Result<Option<PendingRekey>, KeyringError> {
        let Some(bytes) = self.storage.get(keys::REKEY_PENDING).await? else {
            return Ok(None);
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| KeyringError::Corrupted(format!("rekey marker: {e}")))
    }

    /// Derives the key for a new password without committing it.
    ///
    /// Uses the installation salt and the configured parameters. The vault
    /// must be unlocked.
    pub async fn stage_key(&self, new_password: MasterPassword) -> Result<StagedKey, KeyringError> {
        if !self.is_unlocked() {
            return Err(KeyringError::KeyNotInitialized);
        }

        if new_password.is_empty() {
            return Err(KeyringError::EmptyPassword);
        }

        let salt = self.require_salt().await?;
        let params = self.configured_params();

        debug!(iterations = params.iterations, "Deriving staged key");

        let key = derive(new_password, salt, params).await?;
        let token = aead::encrypt(VERIFICATION_PLAINTEXT, &key)?;

        Ok(StagedKey { key, params, token })
    }

    /// Writes the journal marker for a staged key.
    pub async fn begin_rekey(&mut self, staged: &StagedKey) -> Result<(), KeyringError> {
        let marker = serde_json::to_vec(&staged.pending())
            .map_err(|e| KeyringError::Storage(e.to_string()))?;
        self.storage.put(keys::REKEY_PENDING, &marker).await?;

        info!("Master-password change journaled");

        Ok(())
    }

    /// Drops the journal marker, keeping the old password in force.
    pub async fn abandon_rekey(&mut self) -> Result<(), KeyringError> {
        self.storage.delete(keys::REKEY_PENDING).await?;

        warn!("Master-password change rolled back");

        Ok(())
    }

    /// Promotes the journaled token.
    ///
    /// After this the new password is the only one that unlocks the vault.
    /// The old key is dropped from memory; call [`KeyManager::logout`] to
    /// clear the auth hint as well.
    pub async fn commit_rekey(&mut self) -> Result<(), KeyringError> {
        let pending = self
            .pending_rekey()
            .await?
            .ok_or_else(|| KeyringError::Corrupted("no master-password change in flight".into()))?;

        self.storage
            .put(
                keys::VERIFICATION_TEXT,
                pending.verification_text.as_str().as_bytes(),
            )
            .await?;
        self.store_params(&pending.kdf_params).await?;
        self.master_key = None;
        self.storage.delete(keys::REKEY_PENDING).await?;
        self.password_set = true;

        info!(
            iterations = pending.kdf_params.iterations,
            "Master-password change committed"
        );

        Ok(())
    }

    /// Tells which side of the in-flight change `password` belongs to.
    ///
    /// Returns the derived key along with the answer so the caller can test
    /// records with it.
    pub async fn identify_rekey_password(
        &self,
        password: MasterPassword,
    ) -> Result<RekeyIdentity, KeyringError> {
        let pending = self
            .pending_rekey()
            .await?
            .ok_or_else(|| KeyringError::Corrupted("no master-password change in flight".into()))?;

        if password.is_empty() {
            return Ok(RekeyIdentity::Unknown);
        }

        let salt = self.require_salt().await?;
        let committed_params = self.load_params().await?.unwrap_or_default();
        let committed_token = self
            .load_token(keys::VERIFICATION_TEXT)
            .await?
            .ok_or(KeyringError::NotInitialized)?;

        if committed_params == pending.kdf_params {
            let key = derive(password, salt, committed_params).await?;
            return Ok(if token_matches(&pending.verification_text, &key) {
                RekeyIdentity::New(key)
            } else if token_matches(&committed_token, &key) {
                RekeyIdentity::Old(key)
            } else {
                RekeyIdentity::Unknown
            });
        }

        // Different work factors: the password has to be derived twice.
        let retry = password.clone();

        let key = derive(password, salt, pending.kdf_params).await?;
        if token_matches(&pending.verification_text, &key) {
            return Ok(RekeyIdentity::New(key));
        }

        let key = derive(retry, salt, committed_params).await?;
        if token_matches(&committed_token, &key) {
            return Ok(RekeyIdentity::Old(key));
        }

        Ok(RekeyIdentity::Unknown)
    }
}
