//! # Enclave Keyring
//!
//! Master key lifecycle for the Enclave vault.
//!
//! The key manager moves between three states:
//! - **Uninitialized**: no master password has been set
//! - **LoggedOut**: a password is set but the key is not in memory
//! - **Authenticated**: the key is in memory, fields can be encrypted
//!
//! ## Verification token
//!
//! The password is never stored. A fixed marker encrypted under the master
//! key is persisted instead; a candidate password is correct exactly when
//! the key derived from it decrypts that marker.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cipher;
pub mod error;
pub mod rekey;
pub mod session;

use enclave_crypto::{aead, kdf, EncryptedField, KdfParams, MasterKey, MasterPassword, Salt};
use enclave_storage::StorageBackend;
use tracing::{debug, info, warn};

pub use cipher::FieldCipher;
pub use error::KeyringError;
pub use rekey::{PendingRekey, RekeyIdentity, StagedKey};
pub use session::VaultSession;

/// Keys for the vault settings store.
pub mod keys {
    /// Base64 KDF salt, written once.
    pub const CRYPTO_SALT: &str = "crypto_salt";
    /// Base64 verification token under the current master key.
    pub const VERIFICATION_TEXT: &str = "verification_text";
    /// Best-effort "was unlocked" hint (`[1]` or `[0]`).
    pub const AUTH_STATE: &str = "auth_state";
    /// JSON KDF parameters the current key was derived with.
    pub const KDF_PARAMS: &str = "kdf_params";
    /// Journal marker of an in-flight master-password change.
    pub const REKEY_PENDING: &str = "rekey_pending";
}

/// Plaintext of the verification token.
pub const VERIFICATION_PLAINTEXT: &str = "verification_text";

/// State of the key manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// No master password has been set.
    Uninitialized,
    /// A master password is set but the key is not in memory.
    LoggedOut,
    /// The master key is in memory.
    Authenticated,
}

/// Owns the master key for the lifetime of the process.
pub struct KeyManager<S: StorageBackend> {
    storage: S,
    params: KdfParams,
    master_key: Option<MasterKey>,
    password_set: bool,
}

impl<S: StorageBackend> KeyManager<S> {
    /// Creates a key manager with the default KDF parameters.
    pub async fn new(storage: S) -> Result<Self, KeyringError> {
        Self::with_params(storage, KdfParams::default()).await
    }

    /// Creates a key manager.
    ///
    /// `params` apply to new installations and to the next master-password
    /// change. An existing installation keeps deriving with the parameters
    /// it was set up with.
    pub async fn with_params(storage: S, params: KdfParams) -> Result<Self, KeyringError> {
        params.validate()?;

        let mut manager = Self {
            storage,
            params,
            master_key: None,
            password_set: false,
        };

        manager.load_status().await?;

        Ok(manager)
    }

    async fn load_status(&mut self) -> Result<(), KeyringError> {
        self.password_set = self.storage.exists(keys::VERIFICATION_TEXT).await?;

        if self.storage.exists(keys::REKEY_PENDING).await? {
            warn!("Interrupted master-password change detected");
        }

        debug!(status = ?self.status(), "Key status loaded");
        Ok(())
    }

    /// Returns the current state.
    pub fn status(&self) -> KeyStatus {
        if self.master_key.is_some() {
            KeyStatus::Authenticated
        } else if self.password_set {
            KeyStatus::LoggedOut
        } else {
            KeyStatus::Uninitialized
        }
    }

    /// Returns true if a master password has been set.
    pub fn is_password_set(&self) -> bool {
        self.password_set
    }

    /// Returns true if the master key is in memory.
    ///
    /// The persisted auth hint is never consulted: after a restart the vault
    /// is locked until the password is entered again.
    pub fn is_unlocked(&self) -> bool {
        self.master_key.is_some()
    }

    /// Returns whether the vault was unlocked when it was last used.
    pub async fn last_auth_hint(&self) -> Result<bool, KeyringError> {
        Ok(matches!(
            self.storage.get(keys::AUTH_STATE).await?.as_deref(),
            Some([1])
        ))
    }

    /// Returns the KDF parameters applied to new keys.
    pub fn configured_params(&self) -> KdfParams {
        self.params
    }

    /// Sets up the master key from the first password.
    ///
    /// Generates and persists the salt on first run, derives the key and
    /// marks the vault authenticated. Follow with
    /// [`Self::establish_verification_token`] before encrypting anything.
    pub async fn initialize(&mut self, password: MasterPassword) -> Result<(), KeyringError> {
        if self.status() != KeyStatus::Uninitialized {
            return Err(KeyringError::AlreadyInitialized);
        }

        if password.is_empty() {
            return Err(KeyringError::EmptyPassword);
        }

        let salt = match self.load_salt().await? {
            Some(salt) => salt,
            None => {
                let salt = Salt::generate();
                self.storage
                    .put(keys::CRYPTO_SALT, salt.to_base64().as_bytes())
                    .await?;
                debug!("Generated installation salt");
                salt
            },
        };

        let params = match self.load_params().await? {
            Some(params) => params,
            None => {
                self.store_params(&self.params).await?;
                self.params
            },
        };

        info!(iterations = params.iterations, "Deriving master key");

        let key = derive(password, salt, params).await?;

        self.storage.put(keys::AUTH_STATE, &[1]).await?;
        self.master_key = Some(key);

        info!("Master key initialized");

        Ok(())
    }

    /// Persists the verification token for the current key.
    ///
    /// Called once, right after the first [`Self::initialize`].
    pub async fn establish_verification_token(&mut self) -> Result<(), KeyringError> {
        if self.password_set {
            return Err(KeyringError::AlreadyInitialized);
        }

        let key = self
            .master_key
            .as_ref()
            .ok_or(KeyringError::KeyNotInitialized)?;

        let token = aead::encrypt(VERIFICATION_PLAINTEXT, key)?;
        self.storage
            .put(keys::VERIFICATION_TEXT, token.as_str().as_bytes())
            .await?;
        self.password_set = true;

        info!("Verification token established");

        Ok(())
    }

    /// Checks a password against the verification token.
    ///
    /// On success the derived key is kept and the vault is unlocked. A wrong
    /// password (including the empty one) returns `Ok(false)` and leaves the
    /// state untouched.
    ///
    /// # Errors
    ///
    /// - [`KeyringError::NotInitialized`] if no password was ever set
    /// - [`KeyringError::RekeyPending`] if a password change was interrupted
    pub async fn verify(&mut self, password: MasterPassword) -> Result<bool, KeyringError> {
        if self.storage.exists(keys::REKEY_PENDING).await? {
            return Err(KeyringError::RekeyPending);
        }

        let token = self
            .load_token(keys::VERIFICATION_TEXT)
            .await?
            .ok_or(KeyringError::NotInitialized)?;

        if password.is_empty() {
            debug!("Empty password rejected");
            return Ok(false);
        }

        let salt = self.require_salt().await?;
        let params = self.load_params().await?.unwrap_or_default();

        let candidate = derive(password, salt, params).await?;

        if !token_matches(&token, &candidate) {
            warn!("Master password verification failed");
            return Ok(false);
        }

        self.storage.put(keys::AUTH_STATE, &[1]).await?;
        self.master_key = Some(candidate);

        info!("Vault unlocked");

        Ok(true)
    }

    /// Wipes the master key from memory and clears the auth hint.
    #[doc(alias = "clear")]
    pub async fn logout(&mut self) -> Result<(), KeyringError> {
        // Dropping the key zeroizes it.
        self.master_key = None;
        self.storage.put(keys::AUTH_STATE, &[0]).await?;

        info!("Vault locked");

        Ok(())
    }

    /// Returns a cipher over the unlocked key.
    ///
    /// Fails with [`KeyringError::NotInitialized`] until the verification
    /// token has been established.
    pub fn cipher(&self) -> Result<FieldCipher<'_>, KeyringError> {
        if !self.password_set {
            return Err(KeyringError::NotInitialized);
        }
        self.master_key
            .as_ref()
            .map(FieldCipher::new)
            .ok_or(KeyringError::KeyNotInitialized)
    }

    /// Encrypts a field under the master key.
    pub fn encrypt_field(&self, plaintext: &str) -> Result<EncryptedField, KeyringError> {
        self.cipher()?.encrypt(plaintext)
    }

    /// Decrypts a field with the master key.
    pub fn decrypt_field(
        &self,
        field: &EncryptedField,
    ) -> Result<zeroize::Zeroizing<String>, KeyringError> {
        self.cipher()?.decrypt(field)
    }

    pub(crate) async fn load_salt(&self) -> Result<Option<Salt>, KeyringError> {
        let Some(bytes) = self.storage.get(keys::CRYPTO_SALT).await? else {
            return Ok(None);
        };

        let encoded = std::str::from_utf8(&bytes)
            .map_err(|_| KeyringError::Corrupted("stored salt is not text".into()))?;

        Salt::from_base64(encoded)
            .map(Some)
            .map_err(|e| KeyringError::Corrupted(format!("stored salt: {e}")))
    }

    pub(crate) async fn require_salt(&self) -> Result<Salt, KeyringError> {
        self.load_salt()
            .await?
            .ok_or_else(|| KeyringError::Corrupted("salt missing".into()))
    }

    pub(crate) async fn load_params(&self) -> Result<Option<KdfParams>, KeyringError> {
        let Some(bytes) = self.storage.get(keys::KDF_PARAMS).await? else {
            return Ok(None);
        };

        let params: KdfParams = serde_json::from_slice(&bytes)
            .map_err(|e| KeyringError::Corrupted(format!("stored kdf params: {e}")))?;
        params.validate()?;

        Ok(Some(params))
    }

    pub(crate) async fn store_params(&self, params: &KdfParams) -> Result<(), KeyringError> {
        let json = serde_json::to_vec(params).map_err(|e| KeyringError::Storage(e.to_string()))?;
        self.storage.put(keys::KDF_PARAMS, &json).await?;
        Ok(())
    }

    pub(crate) async fn load_token(&self, key: &str) -> Result<Option<EncryptedField>, KeyringError> {
        let Some(bytes) = self.storage.get(key).await? else {
            return Ok(None);
        };

        let encoded = String::from_utf8(bytes)
            .map_err(|_| KeyringError::Corrupted(format!("{key} is not text")))?;

        Ok(Some(EncryptedField::from_encoded(encoded)))
    }
}

impl<S: StorageBackend> std::fmt::Debug for KeyManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("status", &self.status())
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Derives a key on the blocking pool.
pub(crate) async fn derive(
    password: MasterPassword,
    salt: Salt,
    params: KdfParams,
) -> Result<MasterKey, KeyringError> {
    tokio::task::spawn_blocking(move || kdf::derive_key(password, &salt, &params))
        .await
        .map_err(|e| KeyringError::Crypto(format!("key derivation task failed: {e}")))
}

/// Returns true if `key` decrypts `token` to the verification marker.
pub(crate) fn token_matches(token: &EncryptedField, key: &MasterKey) -> bool {
    aead::decrypt(token, key)
        .map(|plaintext| plaintext.as_str() == VERIFICATION_PLAINTEXT)
        .unwrap_or(false)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use enclave_storage::MemoryBackend;

    const FAST: KdfParams = KdfParams { iterations: 1_000 };

    async fn setup() -> (Arc<MemoryBackend>, KeyManager<Arc<MemoryBackend>>) {
        let storage = Arc::new(MemoryBackend::new());
        let manager = KeyManager::with_params(storage.clone(), FAST).await.unwrap();
        (storage, manager)
    }

    async fn first_run(manager: &mut KeyManager<Arc<MemoryBackend>>, password: &str) {
        manager.initialize(password.into()).await.unwrap();
        manager.establish_verification_token().await.unwrap();
    }

    #[tokio::test]
    async fn test_initial_status_uninitialized() {
        let (_storage, manager) = setup().await;

        assert_eq!(manager.status(), KeyStatus::Uninitialized);
        assert!(!manager.is_password_set());
        assert!(!manager.is_unlocked());
    }

    #[tokio::test]
    async fn test_initialize_unlocks_and_persists_salt() {
        let (storage, mut manager) = setup().await;

        manager.initialize("Tr0ub4dor&3".into()).await.unwrap();

        assert!(manager.is_unlocked());
        assert_eq!(manager.status(), KeyStatus::Authenticated);
        assert!(manager.last_auth_hint().await.unwrap());

        let salt = storage.get(keys::CRYPTO_SALT).await.unwrap().unwrap();
        let salt = Salt::from_base64(std::str::from_utf8(&salt).unwrap()).unwrap();
        assert_eq!(salt.as_bytes().len(), 16);

        let params = storage.get(keys::KDF_PARAMS).await.unwrap().unwrap();
        assert_eq!(serde_json::from_slice::<KdfParams>(&params).unwrap(), FAST);
    }

    #[tokio::test]
    async fn test_initialize_rejects_empty_password() {
        let (_storage, mut manager) = setup().await;

        let result = manager.initialize("".into()).await;
        assert!(matches!(result, Err(KeyringError::EmptyPassword)));
        assert!(!manager.is_unlocked());
    }

    #[tokio::test]
    async fn test_initialize_twice_fails() {
        let (_storage, mut manager) = setup().await;
        first_run(&mut manager, "first").await;
        manager.logout().await.unwrap();

        let result = manager.initialize("second".into()).await;
        assert!(matches!(result, Err(KeyringError::AlreadyInitialized)));
    }

    #[tokio::test]
    async fn test_establish_token_requires_key() {
        let (_storage, mut manager) = setup().await;

        let result = manager.establish_verification_token().await;
        assert!(matches!(result, Err(KeyringError::KeyNotInitialized)));
    }

    #[tokio::test]
    async fn test_cipher_requires_verification_token() {
        let (_storage, mut manager) = setup().await;
        manager.initialize("pw".into()).await.unwrap();

        assert!(matches!(
            manager.encrypt_field("x"),
            Err(KeyringError::NotInitialized)
        ));
        assert!(matches!(manager.cipher(), Err(KeyringError::NotInitialized)));

        manager.establish_verification_token().await.unwrap();

        let field = manager.encrypt_field("x").unwrap();
        assert_eq!(manager.decrypt_field(&field).unwrap().as_str(), "x");
    }

    #[tokio::test]
    async fn test_establish_token_only_once() {
        let (_storage, mut manager) = setup().await;
        first_run(&mut manager, "pw").await;

        let result = manager.establish_verification_token().await;
        assert!(matches!(result, Err(KeyringError::AlreadyInitialized)));
    }

    #[tokio::test]
    async fn test_verify_correct_and_wrong_password() {
        let (_storage, mut manager) = setup().await;
        first_run(&mut manager, "Tr0ub4dor&3").await;
        manager.logout().await.unwrap();

        assert!(!manager.verify("wrong".into()).await.unwrap());
        assert!(!manager.is_unlocked());

        assert!(manager.verify("Tr0ub4dor&3".into()).await.unwrap());
        assert!(manager.is_unlocked());
    }

    #[tokio::test]
    async fn test_verify_rejects_near_misses() {
        let (_storage, mut manager) = setup().await;
        first_run(&mut manager, "Tr0ub4dor&3").await;
        manager.logout().await.unwrap();

        for candidate in ["", "Tr0ub4dor&4", "tr0ub4dor&3", "Tr0ub4dor&3 ", "Tr0ub4dor&"] {
            assert!(
                !manager.verify(candidate.into()).await.unwrap(),
                "should reject {candidate:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_failed_verify_keeps_existing_key() {
        let (_storage, mut manager) = setup().await;
        first_run(&mut manager, "pw").await;
        let field = manager.encrypt_field("data").unwrap();

        assert!(!manager.verify("nope".into()).await.unwrap());

        assert!(manager.is_unlocked());
        assert_eq!(manager.decrypt_field(&field).unwrap().as_str(), "data");
    }

    #[tokio::test]
    async fn test_verify_before_setup_fails() {
        let (_storage, mut manager) = setup().await;

        let result = manager.verify("anything".into()).await;
        assert!(matches!(result, Err(KeyringError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_logout_clears_key_and_hint() {
        let (_storage, mut manager) = setup().await;
        first_run(&mut manager, "pw").await;

        manager.logout().await.unwrap();

        assert!(!manager.is_unlocked());
        assert_eq!(manager.status(), KeyStatus::LoggedOut);
        assert!(!manager.last_auth_hint().await.unwrap());
        assert!(matches!(
            manager.encrypt_field("x"),
            Err(KeyringError::KeyNotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_restart_is_locked_despite_auth_hint() {
        let (storage, mut manager) = setup().await;
        first_run(&mut manager, "pw").await;
        assert!(manager.last_auth_hint().await.unwrap());

        // Simulate process death without logout.
        drop(manager);

        let manager = KeyManager::with_params(storage, FAST).await.unwrap();
        assert!(manager.last_auth_hint().await.unwrap());
        assert!(!manager.is_unlocked());
        assert_eq!(manager.status(), KeyStatus::LoggedOut);
    }

    #[tokio::test]
    async fn test_field_roundtrip_and_corruption() {
        let (_storage, mut manager) = setup().await;
        first_run(&mut manager, "pw").await;

        let field = manager.encrypt_field("4111111111111111").unwrap();
        assert_eq!(
            manager.decrypt_field(&field).unwrap().as_str(),
            "4111111111111111"
        );

        let garbage = EncryptedField::from_encoded("AAAA");
        assert!(matches!(
            manager.decrypt_field(&garbage),
            Err(KeyringError::Corrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_existing_install_keeps_stored_params() {
        let (storage, mut manager) = setup().await;
        first_run(&mut manager, "pw").await;
        drop(manager);

        // Reopen with a different configured work factor.
        let mut manager = KeyManager::with_params(storage, KdfParams { iterations: 2_000 })
            .await
            .unwrap();

        assert!(manager.verify("pw".into()).await.unwrap());
        assert_eq!(manager.configured_params().iterations, 2_000);
    }

    #[tokio::test]
    async fn test_corrupted_salt_reported() {
        let (storage, mut manager) = setup().await;
        first_run(&mut manager, "pw").await;
        manager.logout().await.unwrap();

        storage.put(keys::CRYPTO_SALT, b"!!").await.unwrap();

        let result = manager.verify("pw".into()).await;
        assert!(matches!(result, Err(KeyringError::Corrupted(_))));
    }

    #[tokio::test]
    async fn test_debug_hides_key() {
        let (_storage, mut manager) = setup().await;
        first_run(&mut manager, "pw").await;

        let debug = format!("{manager:?}");
        assert!(debug.contains("Authenticated"));
        assert!(!debug.contains("pw"));
    }

    #[tokio::test]
    async fn test_sqlite_persistence_across_restart() {
        let tmp = tempfile::TempDir::new().unwrap();

        {
            let storage = enclave_storage_sqlite::SqliteBackend::open(tmp.path(), "vault")
                .await
                .unwrap();
            let mut manager = KeyManager::with_params(storage, FAST).await.unwrap();
            manager.initialize("Tr0ub4dor&3".into()).await.unwrap();
            manager.establish_verification_token().await.unwrap();
        }

        let storage = enclave_storage_sqlite::SqliteBackend::open(tmp.path(), "vault")
            .await
            .unwrap();
        let mut manager = KeyManager::with_params(storage, FAST).await.unwrap();

        assert_eq!(manager.status(), KeyStatus::LoggedOut);
        assert!(manager.verify("Tr0ub4dor&3".into()).await.unwrap());
    }
}
