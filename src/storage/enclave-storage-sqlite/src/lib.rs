//! # Enclave Storage - SQLite Backend
//!
//! SQLite implementation of both storage interfaces. Each vault is a single
//! database file holding the settings store, the folders and the secret
//! records.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use enclave_storage::{Folder, RecordStore, SecretKind, SecretRecord, StorageBackend, StorageError};

/// SQLite storage backend.
///
/// The database lives at `{base_path}/{name}.db`.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    db_path: PathBuf,
}

type RecordRow = (String, String, Option<String>, String, String);

impl SqliteBackend {
    /// Opens or creates the vault database.
    ///
    /// # Arguments
    ///
    /// * `base_path` - Directory holding the database file
    /// * `name` - Vault name (must match `[a-z0-9_-]+`)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The name is invalid
    /// - Directory cannot be created
    /// - Database connection fails
    pub async fn open(base_path: impl AsRef<Path>, name: &str) -> Result<Self, StorageError> {
        Self::validate_name(name)?;

        let base = base_path.as_ref();
        std::fs::create_dir_all(base).map_err(|e| {
            StorageError::ConnectionFailed(format!("failed to create directory: {e}"))
        })?;

        let db_path = base.join(format!("{name}.db"));

        debug!(vault = %name, path = %db_path.display(), "Opening SQLite database");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let backend = Self { pool, db_path };

        backend.migrate().await?;

        info!(vault = %name, "SQLite backend ready");

        Ok(backend)
    }

    /// Returns the path of the database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Validates that a vault name is safe to use as a file name.
    ///
    /// Only allows: lowercase letters, digits, underscore, hyphen.
    fn validate_name(name: &str) -> Result<(), StorageError> {
        if name.is_empty() {
            return Err(StorageError::InvalidInput(
                "vault name cannot be empty".into(),
            ));
        }

        if name.len() > 64 {
            return Err(StorageError::InvalidInput("vault name too long".into()));
        }

        let valid = name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

        if !valid {
            return Err(StorageError::InvalidInput(
                "vault name must match [a-z0-9_-]+".into(),
            ));
        }

        Ok(())
    }

    /// Runs database migrations.
    async fn migrate(&self) -> Result<(), StorageError> {
        debug!("Running database migrations");

        const SCHEMA: &[&str] = &[
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key        TEXT PRIMARY KEY,
                value      BLOB NOT NULL,
                version    INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS settings_history (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                key        TEXT NOT NULL,
                version    INTEGER NOT NULL,
                operation  TEXT NOT NULL,
                timestamp  INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS folders (
                id   TEXT PRIMARY KEY,
                name TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS secrets (
                id         TEXT PRIMARY KEY,
                title      TEXT NOT NULL,
                folder_id  TEXT REFERENCES folders (id) ON DELETE CASCADE,
                kind       TEXT NOT NULL,
                payload    TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_secrets_folder ON secrets (folder_id)",
            "CREATE INDEX IF NOT EXISTS idx_history_key ON settings_history (key)",
        ];

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::ConnectionFailed(format!("migration failed: {e}")))?;
        }

        debug!("Migrations complete");

        Ok(())
    }

    /// Returns the current Unix timestamp.
    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }

    fn decode_row((id, title, folder_id, kind, payload): RecordRow) -> Result<SecretRecord, StorageError> {
        let parsed: SecretKind = serde_json::from_str(&payload)
            .map_err(|e| StorageError::Serialization(format!("record {id}: {e}")))?;

        if parsed.tag() != kind {
            return Err(StorageError::Serialization(format!(
                "record {id}: kind column says {kind}, payload says {}",
                parsed.tag()
            )));
        }

        Ok(SecretRecord {
            id,
            title,
            folder_id,
            kind: parsed,
        })
    }

    /// Writes one record on the given connection.
    async fn upsert_record(
        conn: &mut SqliteConnection,
        record: &SecretRecord,
    ) -> Result<(), StorageError> {
        if let Some(folder_id) = &record.folder_id {
            let folder: Option<(String,)> = sqlx::query_as("SELECT id FROM folders WHERE id = ?")
                .bind(folder_id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

            if folder.is_none() {
                return Err(StorageError::InvalidInput(format!(
                    "unknown folder: {folder_id}"
                )));
            }
        }

        let payload = serde_json::to_string(&record.kind)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO secrets (id, title, folder_id, kind, payload, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                folder_id = excluded.folder_id,
                kind = excluded.kind,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.title)
        .bind(record.folder_id.as_deref())
        .bind(record.kind.tag())
        .bind(payload)
        .bind(Self::now())
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn record_history(
        conn: &mut SqliteConnection,
        key: &str,
        version: i64,
        operation: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO settings_history (key, version, operation, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(key)
        .bind(version)
        .bind(operation)
        .bind(Self::now())
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(row.map(|(v,)| v))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let now = Self::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))?;

        let existing: Option<(i64,)> = sqlx::query_as("SELECT version FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let (version, operation) = match existing {
            Some((v,)) => (v + 1, "update"),
            None => (1, "create"),
        };

        sqlx::query(
            r#"
            INSERT INTO settings (key, value, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(version)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Self::record_history(&mut tx, key, version, operation).await?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))?;

        let existing: Option<(i64,)> = sqlx::query_as("SELECT version FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        if let Some((version,)) = existing {
            sqlx::query("DELETE FROM settings WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

            Self::record_history(&mut tx, key, version + 1, "delete").await?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))
    }
}

#[async_trait]
impl RecordStore for SqliteBackend {
    async fn all_records(&self) -> Result<Vec<SecretRecord>, StorageError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT id, title, folder_id, kind, payload FROM secrets ORDER BY title, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.into_iter().map(Self::decode_row).collect()
    }

    async fn record(&self, id: &str) -> Result<Option<SecretRecord>, StorageError> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT id, title, folder_id, kind, payload FROM secrets WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        row.map(Self::decode_row).transpose()
    }

    async fn records_in_folder(&self, folder_id: &str) -> Result<Vec<SecretRecord>, StorageError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT id, title, folder_id, kind, payload FROM secrets WHERE folder_id = ? ORDER BY title, id",
        )
        .bind(folder_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.into_iter().map(Self::decode_row).collect()
    }

    async fn put_record(&self, record: &SecretRecord) -> Result<(), StorageError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        Self::upsert_record(&mut conn, record).await
    }

    async fn put_records(&self, records: &[SecretRecord]) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))?;

        for record in records {
            // Dropping `tx` on the error path rolls the batch back.
            Self::upsert_record(&mut tx, record).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Transaction(e.to_string()))?;

        debug!(count = records.len(), "Committed record batch");

        Ok(())
    }

    async fn delete_record(&self, id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM secrets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn folders(&self) -> Result<Vec<Folder>, StorageError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, name FROM folders ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(id, name)| Folder { id, name })
            .collect())
    }

    async fn put_folder(&self, folder: &Folder) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO folders (id, name) VALUES (?, ?) ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(&folder.id)
        .bind(&folder.name)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn delete_folder(&self, id: &str) -> Result<(), StorageError> {
        // Records in the folder go with it (ON DELETE CASCADE).
        sqlx::query("DELETE FROM folders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }
}
