//! # Enclave Crypto
//!
//! Core cryptographic primitives for the Enclave vault.
//!
//! This crate provides the low-level operations the key manager builds on:
//! - Field encryption with AES-256-GCM ([`aead`])
//! - Password-based key derivation with PBKDF2-HMAC-SHA256 ([`kdf`])
//! - Key, salt and password types that wipe themselves ([`keys`])
//! - The `EncryptedField` wire format ([`field`])
//! - Secure random generation ([`random`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod error;
pub mod field;
pub mod kdf;
pub mod keys;
pub mod random;

pub use error::CryptoError;
pub use field::EncryptedField;
pub use kdf::KdfParams;
pub use keys::{MasterKey, MasterPassword, Salt};
