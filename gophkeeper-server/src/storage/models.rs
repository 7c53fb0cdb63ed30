//! Wire and storage model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server records carry one of these two statuses.
pub const STATUS_SAVED: i64 = 1;
pub const STATUS_CONFLICT: i64 = 3;

/// One sealed version of a record. The server never opens it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    #[serde(with = "base64_bytes")]
    pub encrypted_data: Vec<u8>,
    pub name: String,
    pub create_data: DateTime<Utc>,
    pub edit_date: DateTime<Utc>,
}

/// Body of `/register` and `/authorize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityData {
    pub login: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precondition {
    pub base_edit_date: Option<DateTime<Utc>>,
}

/// Body of `/data/replace`: a record plus an optional precondition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceRequest {
    #[serde(flatten)]
    pub record: EncryptedRecord,
    #[serde(default)]
    pub precondition: Option<Precondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub id: i64,
    pub login: String,
    /// Argon2 PHC string of the client's identity hash.
    pub hash: String,
    pub created_at: i64,
}

/// Result of a conditional replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    Conflict,
    Missing,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
