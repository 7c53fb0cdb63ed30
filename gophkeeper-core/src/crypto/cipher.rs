//! AES-256-GCM sealing of record payloads.
//!
//! The envelope format is `nonce(12) || ciphertext || auth_tag(16)`:
//! - 256-bit key
//! - 96-bit nonce drawn from the OS RNG for every seal
//! - 128-bit authentication tag appended by the AEAD

use crate::crypto::{CryptoError, CryptoResult};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Required key length in bytes.
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Symmetric key material derived from the master password.
///
/// The bytes are wiped when the key is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: Vec<u8>,
}

impl SecretKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Get the raw key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey({} bytes)", self.bytes.len())
    }
}

fn cipher_for(key: &[u8]) -> CryptoResult<Aes256Gcm> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            got: key.len(),
        });
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_LEN,
        got: key.len(),
    })
}

/// Seal `plaintext` with AES-256-GCM.
///
/// Returns `nonce(12) || ciphertext || auth_tag(16)`. A fresh random nonce
/// is generated for every call, so sealing the same plaintext twice yields
/// different envelopes.
pub fn seal(key: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext_with_tag = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext_with_tag.len());
    sealed.extend_from_slice(nonce.as_slice());
    sealed.extend_from_slice(&ciphertext_with_tag);
    Ok(sealed)
}

/// Open an envelope produced by [`seal`].
///
/// Fails with [`CryptoError::AuthenticationFailed`] on a wrong key or any
/// tampering, and with [`CryptoError::DecryptionFailed`] when the envelope
/// is too short to contain a nonce and tag.
pub fn open(key: &[u8], sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::DecryptionFailed(format!(
            "Envelope too short: {} bytes",
            sealed.len()
        )));
    }

    let (nonce_bytes, ciphertext_with_tag) = sealed.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext_with_tag)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> Vec<u8> {
        vec![byte; KEY_LEN]
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = key(7);
        let plaintext = b"Hello, World! This is a test.";

        let sealed = seal(&key, plaintext).unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + plaintext.len() + TAG_LEN);

        let opened = open(&key, &sealed).unwrap();
        assert_eq!(opened, plaintext.to_vec());
    }

    #[test]
    fn empty_payload_roundtrip() {
        let key = key(1);
        let sealed = seal(&key, b"").unwrap();
        assert_eq!(open(&key, &sealed).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn different_nonces() {
        let key = key(3);
        let sealed1 = seal(&key, b"Same data").unwrap();
        let sealed2 = seal(&key, b"Same data").unwrap();

        assert_ne!(sealed1[..NONCE_LEN], sealed2[..NONCE_LEN]);
        assert_eq!(open(&key, &sealed1).unwrap(), open(&key, &sealed2).unwrap());
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(&key(1), b"Secret data").unwrap();
        assert!(matches!(
            open(&key(2), &sealed),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn tampering_detected() {
        let key = key(9);
        let mut sealed = seal(&key, b"Original data").unwrap();
        sealed[NONCE_LEN] ^= 0xFF;
        assert!(open(&key, &sealed).is_err());
    }

    #[test]
    fn truncated_envelope_rejected() {
        let key = key(9);
        let sealed = seal(&key, b"Original data").unwrap();
        assert!(matches!(
            open(&key, &sealed[..NONCE_LEN + 4]),
            Err(CryptoError::DecryptionFailed(_))
        ));
        assert!(open(&key, &sealed[..sealed.len() - 1]).is_err());
    }

    #[test]
    fn key_length_enforced() {
        let short = vec![0u8; 16];
        assert!(matches!(
            seal(&short, b"data"),
            Err(CryptoError::InvalidKeyLength {
                expected: 32,
                got: 16
            })
        ));

        let sealed = seal(&key(4), b"data").unwrap();
        assert!(matches!(
            open(&vec![0u8; 33], &sealed),
            Err(CryptoError::InvalidKeyLength { got: 33, .. })
        ));
    }

    #[test]
    fn secret_key_debug_hides_bytes() {
        let key = SecretKey::from_bytes(vec![0xAB; KEY_LEN]);
        assert_eq!(format!("{:?}", key), "SecretKey(32 bytes)");
    }
}
