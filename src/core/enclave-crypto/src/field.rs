//! The encrypted-field wire format.
//!
//! Every sensitive attribute persisted by the record layer is stored as
//! `Base64(nonce[12] || ciphertext || tag[16])`. The string is opaque to
//! everything except [`crate::aead`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::aead::{NONCE_SIZE, TAG_SIZE};
use crate::error::CryptoError;

/// An encrypted, Base64-encoded field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedField(String);

impl EncryptedField {
    /// Wraps an already-encoded field as read from storage.
    ///
    /// No validation happens here; a malformed value is reported when it
    /// is decrypted.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Encodes raw `nonce || ciphertext || tag` bytes.
    pub(crate) fn encode(bytes: &[u8]) -> Self {
        Self(STANDARD.encode(bytes))
    }

    /// Decodes the field into raw `nonce || ciphertext || tag` bytes.
    pub(crate) fn decode(&self) -> Result<Vec<u8>, CryptoError> {
        let bytes = STANDARD
            .decode(self.0.trim())
            .map_err(|e| CryptoError::MalformedCiphertext(format!("invalid base64: {e}")))?;

        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::MalformedCiphertext(format!(
                "expected at least {} bytes, got {}",
                NONCE_SIZE + TAG_SIZE,
                bytes.len()
            )));
        }

        Ok(bytes)
    }

    /// Returns the encoded representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EncryptedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
