//! Enclave CLI - local command line interface.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

use enclave_crypto::{KdfParams, MasterPassword};
use enclave_keyring::{KeyManager, KeyStatus, KeyringError};
use enclave_rekey::{RecoveryOutcome, RekeyError, VaultRekeyCoordinator};
use enclave_storage::{DraftKind, Folder, RecordStore, SecretDraft, SecretRecord};
use enclave_storage_sqlite::SqliteBackend;

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "enclave")]
#[command(about = "Enclave - Local offline secrets vault")]
#[command(version)]
struct Cli {
    /// Directory holding the vault database
    #[arg(long, default_value = ".enclave", env = "ENCLAVE_DATA_DIR")]
    data_dir: PathBuf,

    /// Master password (prompted for when omitted)
    #[arg(long, env = "ENCLAVE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// PBKDF2 iterations for new keys
    #[arg(long, env = "ENCLAVE_KDF_ITERATIONS")]
    kdf_iterations: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the master password on first run
    Init,
    /// Show vault status
    Status,
    /// Folder management
    Folder {
        #[command(subcommand)]
        command: FolderCommands,
    },
    /// Add a secret
    Add {
        #[command(subcommand)]
        kind: AddCommands,
    },
    /// List secrets (titles only, nothing is decrypted)
    List {
        /// Only list secrets in this folder
        #[arg(long)]
        folder: Option<String>,
    },
    /// Decrypt and print a secret
    Show {
        /// Secret id
        id: String,
    },
    /// Delete a secret
    Rm {
        /// Secret id
        id: String,
    },
    /// Change the master password
    Passwd {
        /// New master password (prompted for when omitted)
        #[arg(long, env = "ENCLAVE_NEW_PASSWORD", hide_env_values = true)]
        new_password: Option<String>,
    },
    /// Finish or roll back an interrupted password change
    Recover,
}

#[derive(Subcommand)]
enum FolderCommands {
    /// Create a folder
    Add {
        /// Folder name
        name: String,
    },
    /// List folders
    List,
    /// Delete a folder and every secret in it
    Rm {
        /// Folder id
        id: String,
    },
}

#[derive(Subcommand)]
enum AddCommands {
    /// A login credential
    Credential {
        /// Title
        #[arg(long)]
        title: String,
        /// User name
        #[arg(long)]
        username: String,
        /// Contact e-mail
        #[arg(long)]
        email: Option<String>,
        /// Site address
        #[arg(long)]
        url: Option<String>,
        /// Folder id
        #[arg(long)]
        folder: Option<String>,
    },
    /// A free-form note
    Note {
        /// Title
        #[arg(long)]
        title: String,
        /// Folder id
        #[arg(long)]
        folder: Option<String>,
    },
    /// A payment card
    Card {
        /// Title
        #[arg(long)]
        title: String,
        /// Card holder name
        #[arg(long)]
        owner: String,
        /// Card brand
        #[arg(long)]
        brand: String,
        /// Expiration date (MM/YY)
        #[arg(long)]
        expires: String,
        /// Folder id
        #[arg(long)]
        folder: Option<String>,
    },
}

// ============================================================================
// Vault
// ============================================================================

struct Vault {
    storage: SqliteBackend,
    manager: KeyManager<SqliteBackend>,
    password: Option<String>,
}

impl Vault {
    /// Opens the vault, taking the password out of `cli`.
    async fn open(cli: &mut Cli) -> Result<Self> {
        let params = match cli.kdf_iterations {
            Some(iterations) => KdfParams::new(iterations).context("Invalid --kdf-iterations")?,
            None => KdfParams::default(),
        };

        let storage = SqliteBackend::open(&cli.data_dir, "vault")
            .await
            .with_context(|| format!("Failed to open vault in {}", cli.data_dir.display()))?;

        let manager = KeyManager::with_params(storage.clone(), params)
            .await
            .context("Failed to load vault settings")?;

        debug!(status = ?manager.status(), "Vault opened");

        Ok(Self {
            storage,
            manager,
            password: cli.password.take(),
        })
    }

    fn master_password(&mut self, prompt: &str) -> Result<MasterPassword> {
        match self.password.take() {
            Some(password) => Ok(MasterPassword::new(password)),
            None => {
                let password =
                    rpassword::prompt_password(prompt).context("Failed to read password")?;
                Ok(MasterPassword::new(password))
            },
        }
    }

    async fn unlock(&mut self) -> Result<()> {
        if !self.manager.is_password_set() {
            bail!("No master password set. Run `enclave init` first.");
        }

        let password = self.master_password("Master password: ")?;

        match self.manager.verify(password).await {
            Ok(true) => Ok(()),
            Ok(false) => bail!("Wrong master password"),
            Err(KeyringError::RekeyPending) => {
                bail!("A master-password change was interrupted. Run `enclave recover`.")
            },
            Err(e) => Err(e).context("Failed to unlock vault"),
        }
    }

    async fn lock(&mut self) -> Result<()> {
        self.manager.logout().await.context("Failed to lock vault")
    }

    /// Locks the vault after an unlocked operation. The operation's own error
    /// wins over a failure to lock.
    async fn relock<T>(&mut self, result: Result<T>) -> Result<T> {
        let locked = self.lock().await;
        let value = result?;
        locked?;
        Ok(value)
    }
}

/// Prompts for a new password twice.
fn prompt_new_password(label: &str) -> Result<MasterPassword> {
    let first = Zeroizing::new(
        rpassword::prompt_password(format!("{label}: ")).context("Failed to read password")?,
    );
    let second = Zeroizing::new(
        rpassword::prompt_password(format!("Confirm {}: ", label.to_lowercase()))
            .context("Failed to read password")?,
    );

    if *first != *second {
        bail!("Passwords do not match");
    }

    Ok(MasterPassword::new(first.to_string()))
}

/// Reads a sensitive value without echoing it.
fn prompt_secret(label: &str) -> Result<Zeroizing<String>> {
    rpassword::prompt_password(format!("{label}: "))
        .map(Zeroizing::new)
        .with_context(|| format!("Failed to read {}", label.to_lowercase()))
}

fn optional(value: Zeroizing<String>) -> Option<Zeroizing<String>> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

// ============================================================================
// Command Handlers
// ============================================================================

async fn cmd_init(vault: &mut Vault) -> Result<()> {
    if vault.manager.is_password_set() {
        bail!("A master password is already set. Use `enclave passwd` to change it.");
    }

    let password = match vault.password.take() {
        Some(password) => MasterPassword::new(password),
        None => prompt_new_password("New master password")?,
    };

    vault
        .manager
        .initialize(password)
        .await
        .context("Failed to initialize vault")?;
    vault
        .manager
        .establish_verification_token()
        .await
        .context("Failed to store verification token")?;
    vault.lock().await?;

    println!("Vault initialized in {}", vault.storage.db_path().display());
    println!();
    println!("IMPORTANT: There is no way to recover your secrets if you lose the master password.");

    Ok(())
}

async fn cmd_status(vault: &Vault) -> Result<()> {
    let status = match vault.manager.status() {
        KeyStatus::Uninitialized => "not initialized",
        KeyStatus::LoggedOut => "locked",
        KeyStatus::Authenticated => "unlocked",
    };
    let pending = vault.manager.pending_rekey().await?.is_some();
    let last_unlocked = vault.manager.last_auth_hint().await?;
    let records = vault.storage.all_records().await?.len();
    let folders = vault.storage.folders().await?.len();

    println!("Enclave vault status:");
    println!("  Database:      {}", vault.storage.db_path().display());
    println!("  Status:        {status}");
    println!("  Left unlocked: {last_unlocked}");
    println!("  Secrets:       {records}");
    println!("  Folders:       {folders}");

    if pending {
        println!();
        println!("A master-password change was interrupted. Run `enclave recover`.");
    }

    Ok(())
}

async fn cmd_folder_add(vault: &Vault, name: String) -> Result<()> {
    let folder = Folder::new(name);
    vault.storage.put_folder(&folder).await?;
    println!("Folder '{}' created ({})", folder.name, folder.id);
    Ok(())
}

async fn cmd_folder_list(vault: &Vault) -> Result<()> {
    let folders = vault.storage.folders().await?;

    if folders.is_empty() {
        println!("No folders found");
    } else {
        println!("Folders:");
        for folder in &folders {
            println!("  {}  {}", folder.id, folder.name);
        }
    }

    Ok(())
}

async fn cmd_folder_rm(vault: &Vault, id: &str) -> Result<()> {
    let filed = vault.storage.records_in_folder(id).await?.len();
    vault.storage.delete_folder(id).await?;
    println!("Folder '{id}' deleted along with {filed} secret(s)");
    Ok(())
}

async fn cmd_add(vault: &mut Vault, kind: AddCommands) -> Result<()> {
    let draft = match kind {
        AddCommands::Credential {
            title,
            username,
            email,
            url,
            folder,
        } => SecretDraft {
            title,
            folder_id: folder,
            kind: DraftKind::Credential {
                username,
                password: prompt_secret("Account password")?,
                email,
                url,
            },
        },
        AddCommands::Note { title, folder } => SecretDraft {
            title,
            folder_id: folder,
            kind: DraftKind::Note {
                note: prompt_secret("Note")?,
            },
        },
        AddCommands::Card {
            title,
            owner,
            brand,
            expires,
            folder,
        } => SecretDraft {
            title,
            folder_id: folder,
            kind: DraftKind::Card {
                owner_name: owner,
                card_number: prompt_secret("Card number")?,
                pin: optional(prompt_secret("PIN (leave empty if none)")?),
                brand,
                expiration_date: expires,
                cvv: prompt_secret("CVV")?,
            },
        },
    };

    let record = store_draft(vault, draft).await?;
    println!("Secret '{}' stored ({})", record.title, record.id);

    Ok(())
}

/// Encrypts and stores a draft, locking the vault again whatever happens.
async fn store_draft(vault: &mut Vault, draft: SecretDraft) -> Result<SecretRecord> {
    vault.unlock().await?;

    let stored = match vault.manager.cipher().and_then(|c| c.seal(draft)) {
        Ok(record) => vault
            .storage
            .put_record(&record)
            .await
            .map(|()| record)
            .context("Failed to store secret"),
        Err(e) => Err(e).context("Failed to encrypt secret"),
    };

    vault.relock(stored).await
}

async fn cmd_list(vault: &Vault, folder: Option<&str>) -> Result<()> {
    let records = match folder {
        Some(folder_id) => vault.storage.records_in_folder(folder_id).await?,
        None => vault.storage.all_records().await?,
    };

    if records.is_empty() {
        println!("No secrets found");
    } else {
        println!("Secrets:");
        for record in &records {
            println!("  {}  [{}] {}", record.id, record.kind.tag(), record.title);
        }
    }

    Ok(())
}

fn print_record(record: &SecretRecord, revealed: &SecretDraft) {
    println!("{} [{}]", revealed.title, record.kind.tag());
    println!("  Id:         {}", record.id);
    if let Some(folder) = &revealed.folder_id {
        println!("  Folder:     {folder}");
    }

    match &revealed.kind {
        DraftKind::Credential {
            username,
            password,
            email,
            url,
        } => {
            println!("  Username:   {username}");
            println!("  Password:   {}", password.as_str());
            if let Some(email) = email {
                println!("  E-mail:     {email}");
            }
            if let Some(url) = url {
                println!("  URL:        {url}");
            }
        },
        DraftKind::Note { note } => {
            println!();
            println!("{}", note.as_str());
        },
        DraftKind::Card {
            owner_name,
            card_number,
            pin,
            brand,
            expiration_date,
            cvv,
        } => {
            println!("  Owner:      {owner_name}");
            println!("  Brand:      {brand}");
            println!("  Number:     {}", card_number.as_str());
            println!("  Expires:    {expiration_date}");
            println!("  CVV:        {}", cvv.as_str());
            if let Some(pin) = pin {
                println!("  PIN:        {}", pin.as_str());
            }
        },
    }
}

async fn cmd_show(vault: &mut Vault, id: &str) -> Result<()> {
    let record = vault
        .storage
        .record(id)
        .await?
        .with_context(|| format!("Secret '{id}' not found"))?;

    vault.unlock().await?;
    let revealed = vault
        .manager
        .cipher()
        .and_then(|c| c.reveal(&record))
        .context("Failed to decrypt secret");
    let revealed = vault.relock(revealed).await?;

    print_record(&record, &revealed);

    Ok(())
}

async fn cmd_rm(vault: &Vault, id: &str) -> Result<()> {
    if vault.storage.record(id).await?.is_none() {
        bail!("Secret '{id}' not found");
    }

    vault.storage.delete_record(id).await?;
    println!("Secret '{id}' deleted");
    Ok(())
}

async fn cmd_passwd(vault: &mut Vault, new_password: Option<String>) -> Result<()> {
    if !vault.manager.is_password_set() {
        bail!("No master password set. Run `enclave init` first.");
    }

    let old_password = vault.master_password("Current master password: ")?;
    let new_password = match new_password {
        Some(password) => MasterPassword::new(password),
        None => prompt_new_password("New master password")?,
    };

    let coordinator = VaultRekeyCoordinator::new(vault.storage.clone());

    let changed = match coordinator
        .change_master_password(&mut vault.manager, old_password, new_password)
        .await
    {
        Ok(report) => Ok(report),
        Err(RekeyError::Partial(reason)) => Err(anyhow!(
            "Password change interrupted: {reason}\nRun `enclave recover` with either password."
        )),
        Err(e) => Err(e).context("Password change failed, nothing was modified"),
    };

    // An aborted change may have verified the old password first.
    let report = vault.relock(changed).await?;

    println!(
        "Master password changed ({} secrets, {} fields re-encrypted)",
        report.records, report.fields
    );

    Ok(())
}

async fn cmd_recover(vault: &mut Vault) -> Result<()> {
    let password = vault.master_password("Old or new master password: ")?;
    let coordinator = VaultRekeyCoordinator::new(vault.storage.clone());

    let outcome = coordinator
        .recover(&mut vault.manager, password)
        .await
        .context("Recovery failed")?;

    match outcome {
        RecoveryOutcome::NothingPending => println!("Nothing to recover"),
        RecoveryOutcome::Completed => {
            println!("Password change completed. Unlock with the new master password.")
        },
        RecoveryOutcome::RolledBack => {
            println!("Password change rolled back. Unlock with the old master password.")
        },
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut cli = Cli::parse();
    let mut vault = Vault::open(&mut cli).await?;

    match cli.command {
        Commands::Init => cmd_init(&mut vault).await,
        Commands::Status => cmd_status(&vault).await,
        Commands::Folder { command } => match command {
            FolderCommands::Add { name } => cmd_folder_add(&vault, name).await,
            FolderCommands::List => cmd_folder_list(&vault).await,
            FolderCommands::Rm { id } => cmd_folder_rm(&vault, &id).await,
        },
        Commands::Add { kind } => cmd_add(&mut vault, kind).await,
        Commands::List { folder } => cmd_list(&vault, folder.as_deref()).await,
        Commands::Show { id } => cmd_show(&mut vault, &id).await,
        Commands::Rm { id } => cmd_rm(&vault, &id).await,
        Commands::Passwd { new_password } => cmd_passwd(&mut vault, new_password).await,
        Commands::Recover => cmd_recover(&mut vault).await,
    }
}
