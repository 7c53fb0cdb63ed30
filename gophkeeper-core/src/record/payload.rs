//! Typed record payloads and their canonical JSON encoding.
//!
//! The encoded bytes end up inside sealed envelopes, so field names here are
//! part of the storage format: renaming one makes old records unreadable.

use crate::record::{base64_bytes, RecordKind};
use crate::{KeeperError, Result};
use serde::{Deserialize, Serialize};

/// Website or service login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPayload {
    pub login: String,
    pub password: String,
}

/// Free-form note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPayload {
    pub text: String,
}

/// Arbitrary binary blob with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryPayload {
    #[serde(rename = "type")]
    pub mime: String,
    #[serde(with = "base64_bytes")]
    pub binary: Vec<u8>,
}

/// Bank card details. Fields are kept as strings to preserve leading zeros.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankCardPayload {
    pub number: String,
    pub month: String,
    pub year: String,
    pub cvv: String,
    pub owner: String,
}

/// Decoded value of a record, one variant per [`RecordKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValue {
    Password(PasswordPayload),
    Text(TextPayload),
    Binary(BinaryPayload),
    BankCard(BankCardPayload),
}

impl RecordValue {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Password(_) => RecordKind::Password,
            Self::Text(_) => RecordKind::Text,
            Self::Binary(_) => RecordKind::Binary,
            Self::BankCard(_) => RecordKind::BankCard,
        }
    }

    /// Reject values the vault cannot store meaningfully.
    pub fn validate(&self) -> Result<()> {
        if let Self::Password(p) = self {
            if p.login.is_empty() {
                return Err(KeeperError::InvalidInput("login is empty".to_string()));
            }
            if p.password.is_empty() {
                return Err(KeeperError::InvalidInput("password is empty".to_string()));
            }
        }
        Ok(())
    }

    /// Encode the payload into the bytes stored in [`crate::Record::data`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Self::Password(p) => serde_json::to_vec(p),
            Self::Text(t) => serde_json::to_vec(t),
            Self::Binary(b) => serde_json::to_vec(b),
            Self::BankCard(c) => serde_json::to_vec(c),
        };
        bytes.map_err(|e| KeeperError::Serialization(format!("Payload encode failed: {}", e)))
    }

    /// Decode payload bytes of the given kind.
    pub fn from_bytes(kind: RecordKind, bytes: &[u8]) -> Result<Self> {
        let value = match kind {
            RecordKind::Password => serde_json::from_slice(bytes).map(Self::Password),
            RecordKind::Text => serde_json::from_slice(bytes).map(Self::Text),
            RecordKind::Binary => serde_json::from_slice(bytes).map(Self::Binary),
            RecordKind::BankCard => serde_json::from_slice(bytes).map(Self::BankCard),
        };
        value.map_err(|e| {
            KeeperError::Serialization(format!("Payload decode failed for {:?}: {}", kind, e))
        })
    }
}
