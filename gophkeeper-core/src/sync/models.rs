//! Wire types for the `/api/client` protocol.

use crate::record::EncryptedRecord;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Credentials sent to `/register` and `/authorize`. `hash` is
/// `hex(SHA-256(login || password))`; the password itself never leaves the
/// agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityData {
    pub login: String,
    pub hash: String,
}

/// Condition attached to a replace: the server version the edit was based
/// on. `None` means the agent never saw a server version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precondition {
    pub base_edit_date: Option<DateTime<Utc>>,
}

/// How `/data/replace` should treat the server's current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    /// Overwrite whatever the server holds (conflict resolution).
    Unconditional,
    /// Overwrite only if the server still holds exactly the given base.
    Conditional(Option<DateTime<Utc>>),
}

/// Body of `POST /data/replace`.
#[derive(Debug, Serialize)]
pub struct ReplaceRequest<'a> {
    #[serde(flatten)]
    pub record: &'a EncryptedRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precondition: Option<Precondition>,
}

impl<'a> ReplaceRequest<'a> {
    pub fn new(record: &'a EncryptedRecord, mode: ReplaceMode) -> Self {
        let precondition = match mode {
            ReplaceMode::Unconditional => None,
            ReplaceMode::Conditional(base_edit_date) => Some(Precondition { base_edit_date }),
        };
        Self {
            record,
            precondition,
        }
    }
}

/// Body of `DELETE /data/delete`.
#[derive(Debug, Serialize)]
pub struct DeleteRequest<'a> {
    pub name: &'a str,
}

/// Server answer to a record mutation, after any re-authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Conflict,
    NotFound,
    Forbidden,
    ServerError(u16),
    Unexpected(u16),
}

impl Reply {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            s if s.is_success() => Self::Ok,
            StatusCode::CONFLICT => Self::Conflict,
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::FORBIDDEN => Self::Forbidden,
            s if s.is_server_error() => Self::ServerError(s.as_u16()),
            s => Self::Unexpected(s.as_u16()),
        }
    }
}
