//! # Enclave Rekey
//!
//! Master-password change for the Enclave vault.
//!
//! Every encrypted field has to move from the old key to the new one. The
//! change is staged so that a failure never leaves records under a key no
//! password can derive:
//!
//! 1. Verify the current password
//! 2. Re-encrypt every field under the new key, in memory
//! 3. Journal the new verification token
//! 4. Write all records back in one atomic batch
//! 5. Promote the new token and lock the vault
//!
//! A failure up to step 4 rolls back completely. A failure during step 5
//! leaves the journal in place; [`VaultRekeyCoordinator::recover`] then
//! finishes or rolls back the change.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;

use enclave_crypto::MasterPassword;
use enclave_keyring::{KeyManager, KeyringError, RekeyIdentity, VaultSession};
use enclave_storage::{RecordStore, SecretRecord, StorageBackend};
use tracing::{debug, info, warn};

pub use error::{AbortReason, RekeyError};

/// Summary of a completed master-password change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RekeyReport {
    /// Records rewritten.
    pub records: usize,
    /// Encrypted fields re-encrypted.
    pub fields: usize,
}

/// Result of a recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No change was in flight.
    NothingPending,
    /// The records were already under the new key; the new password is now in force.
    Completed,
    /// The records were still under the old key; the old password stays in force.
    RolledBack,
}

/// Drives master-password changes over a record store.
pub struct VaultRekeyCoordinator<R: RecordStore> {
    records: R,
}

impl<R: RecordStore> VaultRekeyCoordinator<R> {
    /// Creates a coordinator over `records`.
    pub fn new(records: R) -> Self {
        Self { records }
    }

    /// Changes the master password and re-encrypts every record.
    ///
    /// Takes the manager mutably, so no field cipher can be in use while the
    /// change runs. The vault is locked afterwards.
    ///
    /// # Errors
    ///
    /// - [`RekeyError::Aborted`] if nothing was changed
    /// - [`RekeyError::Partial`] if the change must be finished by [`Self::recover`]
    pub async fn change_master_password<S: StorageBackend>(
        &self,
        manager: &mut KeyManager<S>,
        old_password: MasterPassword,
        new_password: MasterPassword,
    ) -> Result<RekeyReport, RekeyError> {
        if new_password.is_empty() {
            return Err(AbortReason::EmptyPassword.into());
        }

        if !manager.verify(old_password).await.map_err(AbortReason::from)? {
            warn!("Master-password change rejected: wrong password");
            return Err(AbortReason::WrongPassword.into());
        }

        let staged = manager
            .stage_key(new_password)
            .await
            .map_err(AbortReason::from)?;

        let records = self.records.all_records().await.map_err(AbortReason::from)?;

        info!(records = records.len(), "Re-encrypting records");

        let (rewritten, fields) = {
            let old = manager.cipher().map_err(AbortReason::from)?;
            let new = staged.cipher();
            let mut fields = 0;
            let mut rewritten = Vec::with_capacity(records.len());

            for record in records {
                let record_id = record.id.clone();
                let record = record.try_map_encrypted_fields(|field, value| {
                    let plaintext = old.decrypt(&value).map_err(|_| AbortReason::Undecryptable {
                        record_id: record_id.clone(),
                        field,
                    })?;
                    fields += 1;
                    new.encrypt(&plaintext).map_err(AbortReason::from)
                })?;
                rewritten.push(record);
            }

            (rewritten, fields)
        };

        manager.begin_rekey(&staged).await.map_err(AbortReason::from)?;

        if let Err(e) = self.records.put_records(&rewritten).await {
            warn!(error = %e, "Record batch failed, rolling back");

            return match manager.abandon_rekey().await {
                Ok(()) => Err(AbortReason::from(e).into()),
                Err(journal) => {
                    lock(manager).await;
                    Err(RekeyError::Partial(format!(
                        "records unchanged but the journal could not be cleared: {journal}"
                    )))
                },
            };
        }

        debug!(records = rewritten.len(), "Record batch committed");

        if let Err(e) = manager.commit_rekey().await {
            // The records are under the new key now; the old one must not be used.
            lock(manager).await;
            return Err(RekeyError::Partial(format!(
                "records rewritten, token not promoted: {e}"
            )));
        }

        lock(manager).await;

        info!(records = rewritten.len(), fields, "Master password changed");

        Ok(RekeyReport {
            records: rewritten.len(),
            fields,
        })
    }

    /// Finishes or rolls back an interrupted master-password change.
    ///
    /// Either password works: the one being changed from or the one being
    /// changed to. The records are decrypted to learn which key they are under,
    /// and the journal is resolved to match. The vault is locked afterwards.
    pub async fn recover<S: StorageBackend>(
        &self,
        manager: &mut KeyManager<S>,
        password: MasterPassword,
    ) -> Result<RecoveryOutcome, RekeyError> {
        let pending = manager.pending_rekey().await.map_err(partial)?;
        if pending.is_none() {
            debug!("No master-password change to recover");
            return Ok(RecoveryOutcome::NothingPending);
        }

        let identity = manager
            .identify_rekey_password(password)
            .await
            .map_err(partial)?;

        let Some(cipher) = identity.cipher() else {
            warn!("Recovery rejected: unknown password");
            return Err(RekeyError::WrongPassword);
        };
        let is_new = matches!(identity, RekeyIdentity::New(_));

        let records = self.records.all_records().await.map_err(|e| partial(e.into()))?;

        let fields: Vec<_> = records.iter().flat_map(SecretRecord::encrypted_fields).collect();
        let under_new = if fields.is_empty() {
            // Nothing encrypted: whichever password was given wins.
            is_new
        } else {
            // Any readable field places the records under this key.
            let readable = fields.iter().filter(|(_, f)| cipher.decrypt(f).is_ok()).count();
            debug!(fields = fields.len(), readable, "Checked records against recovery key");
            if readable > 0 { is_new } else { !is_new }
        };
        drop(identity);

        let outcome = if under_new {
            manager.commit_rekey().await.map_err(partial)?;
            RecoveryOutcome::Completed
        } else {
            manager.abandon_rekey().await.map_err(partial)?;
            RecoveryOutcome::RolledBack
        };

        lock(manager).await;

        info!(outcome = ?outcome, "Master-password change recovered");

        Ok(outcome)
    }

    /// Runs [`Self::change_master_password`] under the session's write lock.
    pub async fn change_master_password_in<S: StorageBackend>(
        &self,
        session: &VaultSession<S>,
        old_password: MasterPassword,
        new_password: MasterPassword,
    ) -> Result<RekeyReport, RekeyError> {
        let mut manager = session.write().await;
        self.change_master_password(&mut manager, old_password, new_password)
            .await
    }

    /// Runs [`Self::recover`] under the session's write lock.
    pub async fn recover_in<S: StorageBackend>(
        &self,
        session: &VaultSession<S>,
        password: MasterPassword,
    ) -> Result<RecoveryOutcome, RekeyError> {
        let mut manager = session.write().await;
        self.recover(&mut manager, password).await
    }
}

fn partial(e: KeyringError) -> RekeyError {
    RekeyError::Partial(e.to_string())
}

/// Logs out after a change. The key is already gone from memory; only the
/// auth hint write can fail here.
async fn lock<S: StorageBackend>(manager: &mut KeyManager<S>) {
    if let Err(e) = manager.logout().await {
        warn!(error = %e, "Failed to clear the auth hint");
    }
}
