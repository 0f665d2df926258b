//! Record persistence interface.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::{Folder, SecretRecord};

/// Persistence for secret records and the folders that group them.
///
/// Records carry only ciphertext in their sensitive fields; implementations
/// store them as-is.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns every record.
    async fn all_records(&self) -> Result<Vec<SecretRecord>, StorageError>;

    /// Returns a record by id.
    async fn record(&self, id: &str) -> Result<Option<SecretRecord>, StorageError>;

    /// Returns the records filed under a folder.
    async fn records_in_folder(&self, folder_id: &str) -> Result<Vec<SecretRecord>, StorageError>;

    /// Inserts or replaces a record.
    async fn put_record(&self, record: &SecretRecord) -> Result<(), StorageError>;

    /// Inserts or replaces a batch of records atomically.
    ///
    /// Either every record is written or none is.
    async fn put_records(&self, records: &[SecretRecord]) -> Result<(), StorageError>;

    /// Deletes a record. Deleting a missing record is not an error.
    async fn delete_record(&self, id: &str) -> Result<(), StorageError>;

    /// Returns every folder.
    async fn folders(&self) -> Result<Vec<Folder>, StorageError>;

    /// Inserts or replaces a folder.
    async fn put_folder(&self, folder: &Folder) -> Result<(), StorageError>;

    /// Deletes a folder together with the records filed under it.
    async fn delete_folder(&self, id: &str) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    async fn all_records(&self) -> Result<Vec<SecretRecord>, StorageError> {
        (**self).all_records().await
    }

    async fn record(&self, id: &str) -> Result<Option<SecretRecord>, StorageError> {
        (**self).record(id).await
    }

    async fn records_in_folder(&self, folder_id: &str) -> Result<Vec<SecretRecord>, StorageError> {
        (**self).records_in_folder(folder_id).await
    }

    async fn put_record(&self, record: &SecretRecord) -> Result<(), StorageError> {
        (**self).put_record(record).await
    }

    async fn put_records(&self, records: &[SecretRecord]) -> Result<(), StorageError> {
        (**self).put_records(records).await
    }

    async fn delete_record(&self, id: &str) -> Result<(), StorageError> {
        (**self).delete_record(id).await
    }

    async fn folders(&self) -> Result<Vec<Folder>, StorageError> {
        (**self).folders().await
    }

    async fn put_folder(&self, folder: &Folder) -> Result<(), StorageError> {
        (**self).put_folder(folder).await
    }

    async fn delete_folder(&self, id: &str) -> Result<(), StorageError> {
        (**self).delete_folder(id).await
    }
}
