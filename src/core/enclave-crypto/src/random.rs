//! Cryptographically secure random generation.
//!
//! Uses the operating system's CSPRNG for all random number generation.

use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::aead::{KEY_SIZE, NONCE_SIZE};
use crate::keys::SALT_SIZE;

/// Generates a cryptographically secure random 256-bit key.
///
/// The key is wrapped in `Zeroizing` to ensure it is cleared from memory when dropped.
pub fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(&mut *key);
    key
}

/// Generates a fresh random nonce for AES-GCM.
///
/// Every encryption draws a new nonce; nonces are never derived or counted.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Generates a random installation salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}
