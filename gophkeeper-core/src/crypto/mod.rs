//! Envelope cryptography for vault records.
//!
//! This module provides:
//! - PBKDF2-HMAC-SHA256 key derivation from the master password
//! - AES-256-GCM sealing with a prepended random nonce
//! - The login identity hash sent to the server

pub mod cipher;
pub mod kdf;

pub use cipher::{open, seal, SecretKey, KEY_LEN, NONCE_LEN, TAG_LEN};
pub use kdf::{derive_key, identity_hash, KDF_ITERATIONS};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,
}

/// Result type for crypto operations
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;
