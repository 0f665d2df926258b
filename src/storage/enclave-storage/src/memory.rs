//! In-memory backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::StorageBackend;
use crate::error::StorageError;
use crate::model::{Folder, SecretRecord};
use crate::records::RecordStore;

/// Volatile backend implementing both [`StorageBackend`] and [`RecordStore`].
///
/// Nothing survives a drop. Used by tests and by tooling that never needs
/// to persist anything.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    settings: RwLock<BTreeMap<String, Vec<u8>>>,
    records: RwLock<BTreeMap<String, SecretRecord>>,
    folders: RwLock<BTreeMap<String, Folder>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut records: Vec<SecretRecord>) -> Vec<SecretRecord> {
    records.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
    records
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.settings.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.settings
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.settings.write().await.remove(key);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryBackend {
    async fn all_records(&self) -> Result<Vec<SecretRecord>, StorageError> {
        Ok(sorted(self.records.read().await.values().cloned().collect()))
    }

    async fn record(&self, id: &str) -> Result<Option<SecretRecord>, StorageError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn records_in_folder(&self, folder_id: &str) -> Result<Vec<SecretRecord>, StorageError> {
        Ok(sorted(
            self.records
                .read()
                .await
                .values()
                .filter(|r| r.folder_id.as_deref() == Some(folder_id))
                .cloned()
                .collect(),
        ))
    }

    async fn put_record(&self, record: &SecretRecord) -> Result<(), StorageError> {
        if let Some(folder_id) = &record.folder_id {
            if !self.folders.read().await.contains_key(folder_id) {
                return Err(StorageError::InvalidInput(format!(
                    "unknown folder: {folder_id}"
                )));
            }
        }

        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn put_records(&self, records: &[SecretRecord]) -> Result<(), StorageError> {
        let folders = self.folders.read().await;
        let mut guard = self.records.write().await;

        // Validate the whole batch before touching the map.
        for record in records {
            if let Some(folder_id) = &record.folder_id {
                if !folders.contains_key(folder_id) {
                    return Err(StorageError::InvalidInput(format!(
                        "unknown folder: {folder_id}"
                    )));
                }
            }
        }

        for record in records {
            guard.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn delete_record(&self, id: &str) -> Result<(), StorageError> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn folders(&self) -> Result<Vec<Folder>, StorageError> {
        let mut folders: Vec<_> = self.folders.read().await.values().cloned().collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(folders)
    }

    async fn put_folder(&self, folder: &Folder) -> Result<(), StorageError> {
        self.folders
            .write()
            .await
            .insert(folder.id.clone(), folder.clone());
        Ok(())
    }

    async fn delete_folder(&self, id: &str) -> Result<(), StorageError> {
        let mut folders = self.folders.write().await;
        let mut records = self.records.write().await;

        folders.remove(id);
        records.retain(|_, r| r.folder_id.as_deref() != Some(id));
        Ok(())
    }
}
