//! Decrypted in-memory view of the agent store for the UI.
//!
//! The refresh task is the only writer. Each refresh builds a complete
//! [`CacheSnapshot`] and swaps it in whole; readers hold an `Arc` to
//! whichever snapshot was current when they asked.

use crate::database::AgentStore;
use crate::record::{Record, RecordStatus};
use crate::session::UserInfoStorage;
use crate::shutdown::Shutdown;
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One decrypted record with every version the store holds for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRecord {
    pub name: String,
    pub status: RecordStatus,
    pub versions: Vec<Record>,
}

/// Published state of the cache.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub records: Vec<CachedRecord>,
    /// Why the last refresh failed, if it did.
    pub error: Option<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl CacheSnapshot {
    pub fn get(&self, name: &str) -> Option<&CachedRecord> {
        self.records.iter().find(|r| r.name == name)
    }
}

pub struct PlaintextCache {
    store: AgentStore,
    session: UserInfoStorage,
    current: RwLock<Arc<CacheSnapshot>>,
}

impl PlaintextCache {
    pub fn new(store: AgentStore, session: UserInfoStorage) -> Self {
        Self {
            store,
            session,
            current: RwLock::new(Arc::new(CacheSnapshot::default())),
        }
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        match self.current.read() {
            Ok(current) => Arc::clone(&current),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn publish(&self, snapshot: CacheSnapshot) -> Arc<CacheSnapshot> {
        let snapshot = Arc::new(snapshot);
        match self.current.write() {
            Ok(mut current) => *current = Arc::clone(&snapshot),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&snapshot),
        }
        snapshot
    }

    /// Decrypt the whole store and publish the result. On failure an empty
    /// snapshot carrying the error is published instead. Never writes to
    /// the store.
    pub async fn refresh(&self) -> Result<Arc<CacheSnapshot>> {
        match self.load().await {
            Ok(records) => {
                debug!("Plaintext cache refreshed with {} records", records.len());
                Ok(self.publish(CacheSnapshot {
                    records,
                    error: None,
                    refreshed_at: Some(Utc::now()),
                }))
            }
            Err(e) => {
                self.publish(CacheSnapshot {
                    records: Vec::new(),
                    error: Some(e.to_string()),
                    refreshed_at: Some(Utc::now()),
                });
                Err(e)
            }
        }
    }

    async fn load(&self) -> Result<Vec<CachedRecord>> {
        let info = self.session.get().await?;
        let key = info.key.as_bytes();

        self.store
            .list(info.user_id)?
            .into_iter()
            .map(|stored| {
                let versions = stored
                    .versions
                    .iter()
                    .map(|v| v.open(key, stored.status))
                    .collect::<Result<Vec<_>>>()?;
                Ok(CachedRecord {
                    name: stored.name,
                    status: stored.status,
                    versions,
                })
            })
            .collect()
    }

    /// Refresh every `period` until `shutdown` fires.
    pub async fn run(&self, period: Duration, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(period);
        info!("Plaintext cache refresh started (period {:?})", period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.session.is_signed_in().await {
                continue;
            }
            if let Err(e) = self.refresh().await {
                warn!("Plaintext cache refresh failed: {}", e);
            }
        }
        info!("Plaintext cache refresh stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_key, KEY_LEN};
    use crate::record::{RecordValue, TextPayload};
    use crate::session::UserInfo;
    use crate::KeeperError;

    fn note(name: &str) -> Record {
        Record::new(
            name,
            "",
            &RecordValue::Text(TextPayload {
                text: format!("{} body", name),
            }),
        )
        .unwrap()
    }

    async fn signed_in(password: &str) -> UserInfoStorage {
        let session = UserInfoStorage::new();
        session
            .set(UserInfo {
                login: "alice".to_string(),
                password: password.to_string(),
                key: derive_key(password.as_bytes(), KEY_LEN).unwrap(),
                user_id: 1,
                token: "t".to_string(),
            })
            .await;
        session
    }

    #[tokio::test]
    async fn refresh_decrypts_every_version() {
        let store = AgentStore::in_memory().unwrap();
        let key = derive_key(b"hunter2", KEY_LEN).unwrap();
        let a = note("a").seal(key.as_bytes()).unwrap();
        let b1 = note("b").seal(key.as_bytes()).unwrap();
        let b2 = note("b").seal(key.as_bytes()).unwrap();
        store.add(1, &a, RecordStatus::Saved).unwrap();
        store.add_multi(1, &[b1, b2], RecordStatus::Conflict).unwrap();

        let cache = PlaintextCache::new(store, signed_in("hunter2").await);
        assert!(cache.snapshot().records.is_empty());

        let snapshot = cache.refresh().await.unwrap();
        assert!(snapshot.error.is_none());
        assert_eq!(snapshot.records.len(), 2);
        let b = snapshot.get("b").unwrap();
        assert_eq!(b.status, RecordStatus::Conflict);
        assert_eq!(b.versions.len(), 2);
        assert_eq!(b.versions[0].status, RecordStatus::Conflict);
        assert!(Arc::ptr_eq(&snapshot, &cache.snapshot()));
    }

    #[tokio::test]
    async fn wrong_password_publishes_error_without_writes() {
        let store = AgentStore::in_memory().unwrap();
        let key = derive_key(b"hunter2", KEY_LEN).unwrap();
        store
            .add(1, &note("gmail").seal(key.as_bytes()).unwrap(), RecordStatus::Saved)
            .unwrap();
        let before = store.list(1).unwrap();

        let cache = PlaintextCache::new(store.clone(), signed_in("wrong").await);
        assert!(matches!(cache.refresh().await, Err(KeeperError::Crypto(_))));

        let snapshot = cache.snapshot();
        assert!(snapshot.records.is_empty());
        assert!(snapshot.error.is_some());
        assert_eq!(store.list(1).unwrap(), before);
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot() {
        let store = AgentStore::in_memory().unwrap();
        let cache = PlaintextCache::new(store.clone(), signed_in("hunter2").await);
        let old = cache.refresh().await.unwrap();

        let key = derive_key(b"hunter2", KEY_LEN).unwrap();
        store
            .add(1, &note("a").seal(key.as_bytes()).unwrap(), RecordStatus::New)
            .unwrap();
        let new = cache.refresh().await.unwrap();

        assert!(old.records.is_empty());
        assert_eq!(new.records.len(), 1);
    }
}
