//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// The authentication tag did not verify (wrong key, corruption or tampering).
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The ciphertext could not be decoded before decryption was attempted.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Invalid key format or size.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CryptoError {
    /// Returns true if the error means "this ciphertext cannot be decrypted".
    ///
    /// Decode failures and tag failures both count.
    pub fn is_undecryptable(&self) -> bool {
        matches!(
            self,
            CryptoError::AuthenticationFailed | CryptoError::MalformedCiphertext(_)
        )
    }
}
