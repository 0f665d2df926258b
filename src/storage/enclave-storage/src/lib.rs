//! # Enclave Storage
//!
//! Storage abstraction layer for Enclave backends.
//!
//! Two interfaces are defined here:
//! - [`StorageBackend`]: a small key/value store for non-secret vault settings
//! - [`RecordStore`]: persistence for secret records and their folders
//!
//! The record model lives in [`model`]. [`MemoryBackend`] implements both
//! interfaces in memory.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod memory;
pub mod model;
pub mod records;

pub use backend::StorageBackend;
pub use error::StorageError;
pub use memory::MemoryBackend;
pub use model::{DraftKind, Folder, SecretDraft, SecretKind, SecretRecord};
pub use records::RecordStore;
