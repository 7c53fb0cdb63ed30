//! Record model: plaintext records, sealed versions and local status.
//!
//! A [`Record`] is what the user edits. Its JSON form (everything except
//! `status`) is sealed with the master key into an [`EncryptedRecord`],
//! which carries the cleartext `name` the server groups versions by.

pub mod payload;

pub use payload::{BankCardPayload, BinaryPayload, PasswordPayload, RecordValue, TextPayload};

use crate::crypto;
use crate::{KeeperError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of secret held by a record. Encoded as a small integer inside the
/// sealed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RecordKind {
    Password,
    Text,
    Binary,
    BankCard,
}

impl From<RecordKind> for u8 {
    fn from(kind: RecordKind) -> u8 {
        match kind {
            RecordKind::Password => 0,
            RecordKind::Text => 1,
            RecordKind::Binary => 2,
            RecordKind::BankCard => 3,
        }
    }
}

impl TryFrom<u8> for RecordKind {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Password),
            1 => Ok(Self::Text),
            2 => Ok(Self::Binary),
            3 => Ok(Self::BankCard),
            other => Err(format!("unknown record kind {}", other)),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Password => "password",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::BankCard => "card",
        };
        f.write_str(label)
    }
}

/// Local replication status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    /// Created locally, not yet acknowledged by the server.
    #[default]
    New,
    /// Acknowledged by the server and in sync.
    Saved,
    /// Edited locally after being saved; needs a push.
    Changed,
    /// The server holds two or more versions; the user must resolve.
    Conflict,
    /// Local edit resolving a conflict; needs a push.
    FixConflict,
}

impl RecordStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::New => 0,
            Self::Saved => 1,
            Self::Changed => 2,
            Self::Conflict => 3,
            Self::FixConflict => 4,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::New),
            1 => Some(Self::Saved),
            2 => Some(Self::Changed),
            3 => Some(Self::Conflict),
            4 => Some(Self::FixConflict),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Saved => "SAVED",
            Self::Changed => "CHANGED",
            Self::Conflict => "CONFLICT",
            Self::FixConflict => "FIX_CONFLICT",
        }
    }

    /// Statuses holding a local edit the server has not accepted yet.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::New | Self::Changed | Self::FixConflict)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current time truncated to whole seconds, the precision both stores keep.
pub fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Convert stored Unix seconds back to a timestamp.
pub(crate) fn from_unix(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| KeeperError::Serialization(format!("Timestamp out of range: {}", secs)))
}

/// Plaintext record as seen by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub name: String,
    pub metainfo: String,
    /// Local state; never part of the sealed envelope.
    #[serde(skip)]
    pub status: RecordStatus,
    pub create_time: DateTime<Utc>,
    pub edit_time: DateTime<Utc>,
}

impl Record {
    /// Build a new record from a typed value.
    pub fn new(
        name: impl Into<String>,
        metainfo: impl Into<String>,
        value: &RecordValue,
    ) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        value.validate()?;

        let now = now_seconds();
        Ok(Self {
            data: value.to_bytes()?,
            kind: value.kind(),
            name,
            metainfo: metainfo.into(),
            status: RecordStatus::New,
            create_time: now,
            edit_time: now,
        })
    }

    /// Produce the edited successor of this record.
    ///
    /// The name and creation time are kept. The edit time always moves
    /// forward by at least one second so the server can tell versions apart.
    pub fn edited(&self, metainfo: impl Into<String>, value: &RecordValue) -> Result<Self> {
        value.validate()?;

        let floor = self.edit_time + chrono::Duration::seconds(1);
        let now = now_seconds();
        Ok(Self {
            data: value.to_bytes()?,
            kind: value.kind(),
            name: self.name.clone(),
            metainfo: metainfo.into(),
            status: self.status,
            create_time: self.create_time,
            edit_time: if now > floor { now } else { floor },
        })
    }

    /// Decode the typed payload.
    pub fn value(&self) -> Result<RecordValue> {
        RecordValue::from_bytes(self.kind, &self.data)
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        self.value()?.validate()
    }

    /// Seal this record with the master key.
    pub fn seal(&self, key: &[u8]) -> Result<EncryptedRecord> {
        let plaintext = serde_json::to_vec(self)?;
        let encrypted_data = crypto::seal(key, &plaintext)?;
        Ok(EncryptedRecord {
            encrypted_data,
            name: self.name.clone(),
            create_data: self.create_time,
            edit_date: self.edit_time,
        })
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(KeeperError::InvalidInput("name is empty".to_string()));
    }
    Ok(())
}

/// One sealed version of a record, as stored and replicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// `nonce(12) || ciphertext || tag(16)`
    #[serde(with = "base64_bytes")]
    pub encrypted_data: Vec<u8>,
    pub name: String,
    pub create_data: DateTime<Utc>,
    pub edit_date: DateTime<Utc>,
}

impl EncryptedRecord {
    /// Open this version with the master key. `status` comes from the local
    /// store since it is not sealed.
    pub fn open(&self, key: &[u8], status: RecordStatus) -> Result<Record> {
        let plaintext = crypto::open(key, &self.encrypted_data)?;
        let mut record: Record = serde_json::from_slice(&plaintext)?;
        if record.name != self.name {
            return Err(KeeperError::Invariant(format!(
                "sealed name {:?} does not match envelope name {:?}",
                record.name, self.name
            )));
        }
        record.status = status;
        Ok(record)
    }
}

/// Serde helper: `Vec<u8>` as standard base64.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
