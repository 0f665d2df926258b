//! Integration tests for the Enclave vault.
//!
//! These tests drive the full stack (key manager, rekey coordinator and
//! SQLite storage) the way the CLI does, against a throwaway data directory.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::path::{Path, PathBuf};
use std::process::Output;

use anyhow::{bail, Context, Result};
use tempfile::TempDir;
use tokio::process::Command;

use enclave_crypto::{KdfParams, MasterPassword};
use enclave_keyring::KeyManager;
use enclave_storage_sqlite::SqliteBackend;

/// Iteration count used by every test vault.
pub const TEST_ITERATIONS: u32 = 1_000;

// ============================================================================
// Test Vault
// ============================================================================

/// A vault on disk that manages its own data directory.
pub struct TestVault {
    pub storage: SqliteBackend,
    data_dir: TempDir,
}

impl TestVault {
    /// Creates an empty vault in a fresh temporary directory.
    pub async fn create() -> Result<Self> {
        let data_dir = TempDir::new().context("Failed to create temp dir")?;
        let storage = SqliteBackend::open(data_dir.path(), "vault")
            .await
            .context("Failed to open vault")?;

        Ok(Self { storage, data_dir })
    }

    /// Loads a key manager over the vault, as a fresh process would.
    pub async fn manager(&self) -> Result<KeyManager<SqliteBackend>> {
        let params = KdfParams::new(TEST_ITERATIONS)?;
        Ok(KeyManager::with_params(self.storage.clone(), params).await?)
    }

    /// Creates a vault whose master password is already set.
    pub async fn initialized(password: &str) -> Result<(Self, KeyManager<SqliteBackend>)> {
        let vault = Self::create().await?;
        let mut manager = vault.manager().await?;
        manager.initialize(MasterPassword::from(password)).await?;
        manager.establish_verification_token().await?;
        Ok((vault, manager))
    }

    /// Reopens the database from disk, dropping every cached connection.
    pub async fn reopen(&mut self) -> Result<()> {
        self.storage = SqliteBackend::open(self.data_dir.path(), "vault").await?;
        Ok(())
    }
}

// ============================================================================
// CLI
// ============================================================================

/// Find the CLI binary in the target directory.
pub fn find_cli_binary() -> Option<PathBuf> {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());

    let candidates = [
        Path::new(&manifest_dir).join("../../target/debug/enclave"),
        Path::new(&manifest_dir).join("../../target/debug/enclave.exe"),
        Path::new(&manifest_dir).join("../../target/release/enclave"),
        Path::new(&manifest_dir).join("../../target/release/enclave.exe"),
    ];

    candidates
        .iter()
        .find(|candidate| candidate.exists())
        .and_then(|candidate| candidate.canonicalize().ok())
}

/// Runs the CLI against `data_dir` with the given password.
pub async fn run_cli(binary: &Path, data_dir: &Path, password: &str, args: &[&str]) -> Result<Output> {
    let output = Command::new(binary)
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .env("ENCLAVE_PASSWORD", password)
        .env("ENCLAVE_KDF_ITERATIONS", TEST_ITERATIONS.to_string())
        .env_remove("ENCLAVE_NEW_PASSWORD")
        .output()
        .await
        .with_context(|| format!("Failed to run {:?}", binary))?;

    Ok(output)
}

/// Runs the CLI and fails unless it exits successfully.
pub async fn run_cli_ok(
    binary: &Path,
    data_dir: &Path,
    password: &str,
    args: &[&str],
) -> Result<String> {
    let output = run_cli(binary, data_dir, password, args).await?;
    if !output.status.success() {
        bail!(
            "enclave {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use enclave_crypto::{aead, kdf, CryptoError, EncryptedField, Salt};
    use enclave_keyring::{KeyStatus, KeyringError};
    use enclave_rekey::{AbortReason, RecoveryOutcome, RekeyError, VaultRekeyCoordinator};
    use enclave_storage::{DraftKind, RecordStore, SecretDraft, SecretKind};
    use zeroize::Zeroizing;

    const P1: &str = "Tr0ub4dor&3";
    const P2: &str = "correct horse battery staple";
    const CARD_NUMBER: &str = "4111111111111111";

    fn card() -> SecretDraft {
        SecretDraft {
            title: "Visa".to_string(),
            folder_id: None,
            kind: DraftKind::Card {
                owner_name: "J. Doe".to_string(),
                card_number: Zeroizing::new(CARD_NUMBER.to_string()),
                pin: None,
                brand: "visa".to_string(),
                expiration_date: "12/29".to_string(),
                cvv: Zeroizing::new("123".to_string()),
            },
        }
    }

    fn flip_ciphertext_byte(field: &EncryptedField) -> EncryptedField {
        let mut bytes = STANDARD.decode(field.as_str()).unwrap();
        // First byte after the 12-byte nonce.
        bytes[12] ^= 0x01;
        EncryptedField::from_encoded(STANDARD.encode(bytes))
    }

    #[tokio::test]
    async fn test_first_run_and_verify() {
        let vault = TestVault::create().await.unwrap();
        let mut manager = vault.manager().await.unwrap();
        assert_eq!(manager.status(), KeyStatus::Uninitialized);

        manager.initialize(P1.into()).await.unwrap();
        manager.establish_verification_token().await.unwrap();
        assert!(manager.is_password_set());

        // A new process sees the password as set but starts locked.
        let mut manager = vault.manager().await.unwrap();
        assert_eq!(manager.status(), KeyStatus::LoggedOut);

        assert!(manager.verify(P1.into()).await.unwrap());
        assert_eq!(manager.status(), KeyStatus::Authenticated);

        manager.logout().await.unwrap();
        assert!(!manager.verify("wrong".into()).await.unwrap());
        assert_eq!(manager.status(), KeyStatus::LoggedOut);
    }

    #[tokio::test]
    async fn test_password_change_reencrypts_records() {
        let (vault, mut manager) = TestVault::initialized(P1).await.unwrap();

        let record = manager.cipher().unwrap().seal(card()).unwrap();
        let SecretKind::Card { card_number: c1, .. } = &record.kind else {
            panic!("expected a card");
        };
        let c1 = c1.clone();
        vault.storage.put_record(&record).await.unwrap();

        let coordinator = VaultRekeyCoordinator::new(vault.storage.clone());
        let report = coordinator
            .change_master_password(&mut manager, P1.into(), P2.into())
            .await
            .unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.fields, 2);
        assert!(!manager.is_unlocked());

        let mut manager = vault.manager().await.unwrap();
        assert!(!manager.verify(P1.into()).await.unwrap());
        assert!(manager.verify(P2.into()).await.unwrap());

        let stored = vault.storage.record(&record.id).await.unwrap().unwrap();
        let SecretKind::Card { card_number: c2, .. } = &stored.kind else {
            panic!("expected a card");
        };
        assert_ne!(&c1, c2);

        let revealed = manager.cipher().unwrap().reveal(&stored).unwrap();
        let DraftKind::Card { card_number, .. } = revealed.kind else {
            panic!("expected a card");
        };
        assert_eq!(card_number.as_str(), CARD_NUMBER);

        // The old ciphertext no longer opens under the new key.
        assert!(matches!(
            manager.decrypt_field(&c1),
            Err(KeyringError::Corrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_old_password_changes_nothing() {
        let (vault, mut manager) = TestVault::initialized(P1).await.unwrap();
        let record = manager.cipher().unwrap().seal(card()).unwrap();
        vault.storage.put_record(&record).await.unwrap();
        manager.logout().await.unwrap();

        let coordinator = VaultRekeyCoordinator::new(vault.storage.clone());
        let result = coordinator
            .change_master_password(&mut manager, "wrongOldPassword".into(), "new".into())
            .await;
        assert!(matches!(
            result,
            Err(RekeyError::Aborted(AbortReason::WrongPassword))
        ));

        assert_eq!(vault.storage.record(&record.id).await.unwrap().unwrap(), record);
        assert!(manager.pending_rekey().await.unwrap().is_none());

        let mut manager = vault.manager().await.unwrap();
        assert!(manager.verify(P1.into()).await.unwrap());
        assert!(!manager.verify("new".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_field_fails_authentication() {
        let salt = Salt::generate();
        let params = KdfParams::new(TEST_ITERATIONS).unwrap();
        let key = kdf::derive_key(P1.into(), &salt, &params);

        let field = aead::encrypt(CARD_NUMBER, &key).unwrap();
        let tampered = flip_ciphertext_byte(&field);

        assert_eq!(aead::decrypt(&field, &key).unwrap().as_str(), CARD_NUMBER);
        assert!(matches!(
            aead::decrypt(&tampered, &key),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_tampered_record_is_reported_corrupted() {
        let (vault, manager) = TestVault::initialized(P1).await.unwrap();

        let mut record = manager.cipher().unwrap().seal(card()).unwrap();
        if let SecretKind::Card { card_number, .. } = &mut record.kind {
            *card_number = flip_ciphertext_byte(card_number);
        }
        vault.storage.put_record(&record).await.unwrap();

        let stored = vault.storage.record(&record.id).await.unwrap().unwrap();
        assert!(matches!(
            manager.cipher().unwrap().reveal(&stored),
            Err(KeyringError::Corrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_vault_survives_reopen() {
        let (mut vault, mut manager) = TestVault::initialized(P1).await.unwrap();
        let record = manager.cipher().unwrap().seal(card()).unwrap();
        vault.storage.put_record(&record).await.unwrap();
        manager.logout().await.unwrap();
        drop(manager);

        vault.reopen().await.unwrap();

        let mut manager = vault.manager().await.unwrap();
        assert!(!manager.last_auth_hint().await.unwrap());
        assert!(manager.verify(P1.into()).await.unwrap());
        assert!(manager.last_auth_hint().await.unwrap());

        let stored = vault.storage.record(&record.id).await.unwrap().unwrap();
        let revealed = manager.cipher().unwrap().reveal(&stored).unwrap();
        assert_eq!(revealed.title, "Visa");
    }

    #[tokio::test]
    async fn test_recover_with_nothing_pending() {
        let (vault, mut manager) = TestVault::initialized(P1).await.unwrap();
        let coordinator = VaultRekeyCoordinator::new(vault.storage.clone());

        let outcome = coordinator.recover(&mut manager, P1.into()).await.unwrap();
        assert_eq!(outcome, RecoveryOutcome::NothingPending);
    }

    #[tokio::test]
    async fn test_cli_lifecycle() {
        let Some(binary) = find_cli_binary() else {
            eprintln!("enclave binary not built, skipping. Run 'cargo build -p enclave-cli' first.");
            return;
        };
        let data_dir = TempDir::new().unwrap();
        let dir = data_dir.path();

        run_cli_ok(&binary, dir, P1, &["init"]).await.unwrap();

        let status = run_cli_ok(&binary, dir, P1, &["status"]).await.unwrap();
        assert!(status.contains("locked"));

        let created = run_cli_ok(&binary, dir, P1, &["folder", "add", "work"])
            .await
            .unwrap();
        assert!(created.contains("work"));

        let folders = run_cli_ok(&binary, dir, P1, &["folder", "list"]).await.unwrap();
        assert!(folders.contains("work"));

        let secrets = run_cli_ok(&binary, dir, P1, &["list"]).await.unwrap();
        assert!(secrets.contains("No secrets found"));

        // A second init is refused.
        let again = run_cli(&binary, dir, P1, &["init"]).await.unwrap();
        assert!(!again.status.success());

        let changed = run_cli_ok(&binary, dir, P1, &["passwd", "--new-password", P2])
            .await
            .unwrap();
        assert!(changed.contains("Master password changed"));

        let wrong = run_cli(&binary, dir, P1, &["passwd", "--new-password", "x"])
            .await
            .unwrap();
        assert!(!wrong.status.success());

        let recovered = run_cli_ok(&binary, dir, P2, &["recover"]).await.unwrap();
        assert!(recovered.contains("Nothing to recover"));
    }
}
