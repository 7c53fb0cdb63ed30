//! Record operations with local and remote write-through.
//!
//! Every write lands in the agent store with a status telling the
//! reconciler what is left to do, so a local edit is never lost when the
//! server is unreachable.

use crate::database::AgentStore;
use crate::record::{EncryptedRecord, Record, RecordStatus};
use crate::session::UserInfoStorage;
use crate::sync::client::ApiClient;
use crate::sync::models::{ReplaceMode, Reply};
use crate::sync::state::{next_status, SyncEvent};
use crate::{KeeperError, Result};
use tracing::{debug, info, warn};

/// Where a write ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The server accepted it; the local row is `SAVED`.
    Synced,
    /// Only the local store has it; the reconciler will push it.
    StoredLocally,
}

/// Record operations for the signed-in user.
#[derive(Clone)]
pub struct VaultService {
    client: ApiClient,
    store: AgentStore,
    session: UserInfoStorage,
}

impl VaultService {
    pub fn new(client: ApiClient) -> Self {
        let store = client.store().clone();
        let session = client.session().clone();
        Self {
            client,
            store,
            session,
        }
    }

    /// Seal `record` with the session key.
    pub async fn encrypt(&self, record: &Record) -> Result<EncryptedRecord> {
        let info = self.session.get().await?;
        record.seal(info.key.as_bytes())
    }

    /// Open one stored version with the session key.
    pub async fn decrypt(
        &self,
        encrypted: &EncryptedRecord,
        status: RecordStatus,
    ) -> Result<Record> {
        let info = self.session.get().await?;
        encrypted.open(info.key.as_bytes(), status)
    }

    /// Encrypt and save a new record.
    pub async fn save_plain(&self, record: &Record) -> Result<SaveOutcome> {
        record.validate()?;
        let encrypted = self.encrypt(record).await?;
        self.save_cipher(&encrypted).await
    }

    /// Save a new sealed record: server first, local store either way.
    pub async fn save_cipher(&self, encrypted: &EncryptedRecord) -> Result<SaveOutcome> {
        let user_id = self.session.user_id().await?;
        let local = self.store.get_status(user_id, &encrypted.name)?;
        next_status(local, SyncEvent::LocalCreate)?;

        let (status, outcome) = match self.client.add(encrypted).await {
            Ok(Reply::Ok) => (RecordStatus::Saved, SaveOutcome::Synced),
            Ok(Reply::ServerError(code)) => {
                warn!("Server error {} saving {:?}, keeping it local", code, encrypted.name);
                (RecordStatus::New, SaveOutcome::StoredLocally)
            }
            Err(KeeperError::Network(e)) => {
                warn!("Server unreachable saving {:?} ({}), keeping it local", encrypted.name, e);
                (RecordStatus::New, SaveOutcome::StoredLocally)
            }
            Ok(Reply::Conflict) => {
                return Err(KeeperError::AlreadyExists(format!(
                    "{:?} exists on the server",
                    encrypted.name
                )))
            }
            Ok(Reply::Forbidden) => return Err(KeeperError::Forbidden),
            Ok(other) => return Err(reply_error(other, &encrypted.name)),
            Err(e) => return Err(e),
        };

        if !self.store.add(user_id, encrypted, status)? {
            return Err(KeeperError::AlreadyExists(format!("{:?}", encrypted.name)));
        }
        info!("Saved {:?} as {}", encrypted.name, status);
        Ok(outcome)
    }

    /// Encrypt and save an edited record (see [`Record::edited`]).
    pub async fn edit_plain(&self, record: &Record) -> Result<SaveOutcome> {
        record.validate()?;
        let encrypted = self.encrypt(record).await?;
        self.edit_cipher(&encrypted).await
    }

    /// Replace an existing record with a new sealed version.
    pub async fn edit_cipher(&self, encrypted: &EncryptedRecord) -> Result<SaveOutcome> {
        let user_id = self.session.user_id().await?;
        let stored = self
            .store
            .get(user_id, &encrypted.name)?
            .ok_or_else(|| KeeperError::NotFound(format!("{:?}", encrypted.name)))?;
        let edited = next_status(Some(stored.status), SyncEvent::LocalEdit)?;

        let mode = match stored.status {
            // The server has never seen it; the reconciler adds the new version.
            RecordStatus::New => {
                self.replace_local(user_id, encrypted, edited)?;
                return Ok(SaveOutcome::StoredLocally);
            }
            RecordStatus::Conflict | RecordStatus::FixConflict => ReplaceMode::Unconditional,
            RecordStatus::Saved | RecordStatus::Changed => {
                ReplaceMode::Conditional(stored.base_edit_date)
            }
        };

        let (status, outcome) = match self.client.replace(encrypted, mode).await {
            Ok(Reply::Ok) => (RecordStatus::Saved, SaveOutcome::Synced),
            Ok(Reply::Conflict) => {
                debug!("Edit of {:?} conflicts with the server, deferring", encrypted.name);
                (edited, SaveOutcome::StoredLocally)
            }
            Ok(Reply::ServerError(code)) => {
                warn!("Server error {} editing {:?}, keeping it local", code, encrypted.name);
                (edited, SaveOutcome::StoredLocally)
            }
            Err(KeeperError::Network(e)) => {
                warn!("Server unreachable editing {:?} ({}), keeping it local", encrypted.name, e);
                (edited, SaveOutcome::StoredLocally)
            }
            Ok(Reply::NotFound) => {
                return Err(KeeperError::NotFound(format!(
                    "{:?} is gone from the server",
                    encrypted.name
                )))
            }
            Ok(Reply::Forbidden) => return Err(KeeperError::Forbidden),
            Ok(other) => return Err(reply_error(other, &encrypted.name)),
            Err(e) => return Err(e),
        };

        self.replace_local(user_id, encrypted, status)?;
        info!("Edited {:?}, now {}", encrypted.name, status);
        Ok(outcome)
    }

    /// Delete a record everywhere. Offline deletion is not supported.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let user_id = self.session.user_id().await?;
        match self.client.delete(name).await? {
            Reply::Ok | Reply::NotFound => {}
            Reply::Forbidden => return Err(KeeperError::Forbidden),
            other => return Err(reply_error(other, name)),
        }
        let existed = self.store.delete(user_id, name)?;
        info!("Deleted {:?}", name);
        Ok(existed)
    }

    fn replace_local(
        &self,
        user_id: i64,
        encrypted: &EncryptedRecord,
        status: RecordStatus,
    ) -> Result<()> {
        if !self.store.replace(user_id, encrypted, status)? {
            return Err(KeeperError::NotFound(format!("{:?}", encrypted.name)));
        }
        Ok(())
    }
}

fn reply_error(reply: Reply, name: &str) -> KeeperError {
    let status = match reply {
        Reply::ServerError(code) | Reply::Unexpected(code) => code,
        Reply::Conflict => 409,
        Reply::NotFound => 404,
        Reply::Forbidden => 403,
        Reply::Ok => 200,
    };
    KeeperError::Server {
        status,
        message: format!("request for {:?} failed", name),
    }
}
