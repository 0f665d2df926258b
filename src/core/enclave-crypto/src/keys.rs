//! Secure key types with automatic memory zeroization.
//!
//! `MasterKey` and `MasterPassword` implement `Zeroize` and `ZeroizeOnDrop`
//! so sensitive material is erased from memory when dropped, including
//! during unwinding. `Salt` is not secret and is freely copyable.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead::KEY_SIZE;
use crate::error::CryptoError;
use crate::random::{generate_key, generate_salt};

/// Size of the installation salt in bytes.
pub const SALT_SIZE: usize = 16;

/// The 256-bit master key every secret field is encrypted under.
///
/// Only ever held in memory. It is never serialized.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    /// Generates a new random master key.
    pub fn generate() -> Self {
        let key = generate_key();
        Self { bytes: *key }
    }

    /// An all-zero key to be filled in place by the KDF.
    pub(crate) fn zeroed() -> Self {
        Self {
            bytes: [0u8; KEY_SIZE],
        }
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Returns the raw key bytes.
    ///
    /// Use with caution - the returned slice is not zeroized automatically.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The user's master password.
///
/// The only plaintext representation of the secret. Consumed by
/// [`crate::kdf::derive_key`], which drops (and so wipes) it on every path.
/// Clones wipe themselves independently.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterPassword {
    bytes: Vec<u8>,
}

impl MasterPassword {
    /// Wraps a password, taking ownership of its buffer without copying.
    pub fn new(password: String) -> Self {
        Self {
            bytes: password.into_bytes(),
        }
    }

    /// Returns true if the password is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<String> for MasterPassword {
    fn from(password: String) -> Self {
        Self::new(password)
    }
}

impl From<&str> for MasterPassword {
    fn from(password: &str) -> Self {
        Self {
            bytes: password.as_bytes().to_vec(),
        }
    }
}

impl std::fmt::Debug for MasterPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterPassword([REDACTED])")
    }
}

/// A per-installation KDF salt.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generates a new random salt.
    pub fn generate() -> Self {
        Self(generate_salt())
    }

    /// Creates a salt from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; SALT_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidInput(format!(
                "salt must be {} bytes, got {}",
                SALT_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Decodes a Base64-encoded salt. Surrounding whitespace is ignored.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidInput(format!("salt is not base64: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Encodes the salt as Base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Returns the raw salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Salt").field(&self.to_base64()).finish()
    }
}
