//! GophKeeper Agent Core Library
//!
//! This library provides the agent side of the vault: envelope
//! cryptography, the local ciphertext store, the record state machine, the
//! reconciler that replicates records with the server, record operations
//! and the decrypted in-memory cache the UI reads from.

pub mod cache;
pub mod crypto;
pub mod daemon;
pub mod database;
pub mod record;
pub mod session;
pub mod shutdown;
pub mod sync;
pub mod vault;

pub use cache::{CacheSnapshot, CachedRecord, PlaintextCache};
pub use crypto::{derive_key, identity_hash, open, seal, CryptoError, SecretKey};
pub use daemon::{AgentRuntime, RuntimeConfig};
pub use database::{AgentStore, DatabaseError, LocalUser, StoredRecord};
pub use record::{
    BankCardPayload, BinaryPayload, EncryptedRecord, PasswordPayload, Record, RecordKind,
    RecordStatus, RecordValue, TextPayload,
};
pub use session::{UserInfo, UserInfoStorage};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use sync::{ApiClient, Reconciler, TickReport};
pub use vault::{SaveOutcome, VaultService};

use thiserror::Error;

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, KeeperError>;

/// General error type for agent operations
#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Forbidden: agent is out of sync, pull required")]
    Forbidden,

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeeperError {
    /// Whether retrying on a later tick may succeed without user action.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Forbidden | Self::Cancelled => true,
            Self::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for KeeperError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(e))
    }
}

impl From<serde_json::Error> for KeeperError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
