//! Signed-in user state shared by every agent task.

use crate::crypto::SecretKey;
use crate::{KeeperError, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Credentials and derived key of the signed-in user.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct UserInfo {
    pub login: String,
    pub password: String,
    pub key: SecretKey,
    /// Local user id; the primary key scope of the agent store.
    pub user_id: i64,
    pub token: String,
}

impl std::fmt::Debug for UserInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserInfo")
            .field("login", &self.login)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// Process-wide holder of [`UserInfo`].
///
/// Read-mostly: the login flow writes, the reconciler and record operations
/// read. Cheap to clone.
#[derive(Clone, Default)]
pub struct UserInfoStorage {
    inner: Arc<RwLock<Option<UserInfo>>>,
}

impl UserInfoStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, info: UserInfo) {
        *self.inner.write().await = Some(info);
    }

    pub async fn clear(&self) {
        *self.inner.write().await = None;
    }

    /// Snapshot of the signed-in user.
    pub async fn get(&self) -> Result<UserInfo> {
        self.inner
            .read()
            .await
            .clone()
            .ok_or_else(|| KeeperError::Auth("not signed in".to_string()))
    }

    pub async fn is_signed_in(&self) -> bool {
        self.inner.read().await.is_some()
    }

    pub async fn user_id(&self) -> Result<i64> {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|info| info.user_id)
            .ok_or_else(|| KeeperError::Auth("not signed in".to_string()))
    }

    pub async fn token(&self) -> Result<String> {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|info| info.token.clone())
            .ok_or_else(|| KeeperError::Auth("not signed in".to_string()))
    }

    /// Replace the bearer token after a re-authentication.
    pub async fn set_token(&self, token: &str) -> Result<()> {
        match self.inner.write().await.as_mut() {
            Some(info) => {
                info.token = token.to_string();
                Ok(())
            }
            None => Err(KeeperError::Auth("not signed in".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserInfo {
        UserInfo {
            login: "alice".to_string(),
            password: "hunter2".to_string(),
            key: SecretKey::from_bytes(vec![1; 32]),
            user_id: 1,
            token: "t1".to_string(),
        }
    }

    #[tokio::test]
    async fn empty_storage_is_signed_out() {
        let storage = UserInfoStorage::new();
        assert!(!storage.is_signed_in().await);
        assert!(matches!(storage.get().await, Err(KeeperError::Auth(_))));
        assert!(storage.set_token("t").await.is_err());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let storage = UserInfoStorage::new();
        let reader = storage.clone();
        storage.set(alice()).await;

        assert_eq!(reader.user_id().await.unwrap(), 1);
        storage.set_token("t2").await.unwrap();
        assert_eq!(reader.token().await.unwrap(), "t2");

        reader.clear().await;
        assert!(!storage.is_signed_in().await);
    }

    #[test]
    fn debug_hides_secrets() {
        let rendered = format!("{:?}", alice());
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("t1"));
    }
}
