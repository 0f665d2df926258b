//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection to the backing store failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A query or statement failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Invalid input (identifier, path, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),
}
