//! Password-based key derivation.
//!
//! Derives the master key from the user's password and the installation salt
//! with PBKDF2-HMAC-SHA256. The iteration count is the brute-force work
//! factor; it is fixed per installation and only changes through a
//! master-password change.

use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::CryptoError;
use crate::keys::{MasterKey, MasterPassword, Salt};

/// Default PBKDF2 iteration count for new installations.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Key derivation parameters.
///
/// The algorithm (PBKDF2-HMAC-SHA256) and the output length (256 bits) are
/// fixed; only the iteration count is tunable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Number of PBKDF2 rounds.
    pub iterations: u32,
}

impl KdfParams {
    /// Creates parameters with the given iteration count.
    pub fn new(iterations: u32) -> Result<Self, CryptoError> {
        let params = Self { iterations };
        params.validate()?;
        Ok(params)
    }

    /// Validates the parameters.
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.iterations == 0 {
            return Err(CryptoError::InvalidInput(
                "iteration count must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// Derives the master key from a password and salt.
///
/// Deterministic: the same password, salt and parameters always yield the
/// same key. The password is consumed; its buffer is wiped when this function
/// returns or unwinds.
pub fn derive_key(password: MasterPassword, salt: &Salt, params: &KdfParams) -> MasterKey {
    let mut key = MasterKey::zeroed();
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt.as_bytes(),
        params.iterations,
        key.as_mut_bytes(),
    );
    key
}
