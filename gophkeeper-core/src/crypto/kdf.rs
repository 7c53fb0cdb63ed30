//! Master-password key derivation and the login identity hash.
//!
//! Keys are derived with PBKDF2-HMAC-SHA256 at 100,000 iterations. The salt
//! is the password itself so that records sealed by existing agents stay
//! readable; see DESIGN.md before changing it.

use crate::crypto::{CryptoError, CryptoResult, SecretKey};
use sha2::{Digest, Sha256};

/// PBKDF2 iteration count.
pub const KDF_ITERATIONS: u32 = 100_000;

/// Derive a `key_len`-byte key from the master password.
///
/// Deterministic: the same password always yields the same key.
pub fn derive_key(password: &[u8], key_len: usize) -> CryptoResult<SecretKey> {
    if key_len == 0 {
        return Err(CryptoError::KdfFailed(
            "Requested key length is zero".to_string(),
        ));
    }

    let mut key = vec![0u8; key_len];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, password, KDF_ITERATIONS, &mut key);
    Ok(SecretKey::from_bytes(key))
}

/// Hash sent to the server in place of the password:
/// `hex(SHA-256(login || password))`.
pub fn identity_hash(login: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(login.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
