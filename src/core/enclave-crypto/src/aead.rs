//! AES-256-GCM authenticated encryption.
//!
//! This is the cipher engine for every secret field in the vault. It is
//! stateless: each call receives the key it should use, so calls are safe to
//! run concurrently from any number of threads.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::field::EncryptedField;
use crate::keys::MasterKey;
use crate::random::generate_nonce;

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of a GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encrypts a field value under `key`.
///
/// A fresh random nonce is generated for every call, so encrypting the same
/// plaintext twice never yields the same field.
/// Format: `Base64(nonce (12 bytes) || ciphertext || tag (16 bytes))`
pub fn encrypt(plaintext: &str, key: &MasterKey) -> Result<EncryptedField, CryptoError> {
    let sealed = seal(key, plaintext.as_bytes())?;
    Ok(EncryptedField::encode(&sealed))
}

/// Decrypts a field value with `key`.
///
/// Tag verification is part of decryption. A wrong key, a corrupted or a
/// tampered field all fail with [`CryptoError::AuthenticationFailed`];
/// undecodable input fails with [`CryptoError::MalformedCiphertext`].
///
/// # Returns
///
/// Decrypted plaintext wrapped in `Zeroizing` for automatic memory cleanup.
pub fn decrypt(field: &EncryptedField, key: &MasterKey) -> Result<Zeroizing<String>, CryptoError> {
    let bytes = field.decode()?;
    let plaintext = open(key, &bytes)?;

    let text = std::str::from_utf8(&plaintext).map_err(|_| {
        CryptoError::MalformedCiphertext("plaintext is not valid utf-8".to_string())
    })?;

    Ok(Zeroizing::new(text.to_owned()))
}

/// Encrypts raw bytes, returning `nonce || ciphertext || tag`.
fn seal(key: &MasterKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypts `nonce || ciphertext || tag` produced by [`seal`].
fn open(key: &MasterKey, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::MalformedCiphertext(
            "ciphertext too short".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
    let encrypted = &sealed[NONCE_SIZE..];

    let plaintext = cipher
        .decrypt(nonce, encrypted)
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    Ok(Zeroizing::new(plaintext))
}
