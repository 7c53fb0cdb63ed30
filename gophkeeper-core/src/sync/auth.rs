//! Bearer tokens and the agent's register/login flows.

use crate::crypto::{derive_key, identity_hash, KEY_LEN};
use crate::session::UserInfo;
use crate::sync::client::ApiClient;
use crate::sync::models::IdentityData;
use crate::{KeeperError, Result};
use tracing::{info, warn};

/// Format the `Authorization` header value for `token`.
pub fn bearer_header(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Extract the token from an `Authorization: Bearer <token>` value.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// How a login was completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMode {
    /// The server accepted the credentials and issued a fresh token.
    Online,
    /// The server was unreachable; the local auth row vouched for them.
    Offline,
}

fn check_credentials(login: &str, password: &str) -> Result<()> {
    if login.is_empty() {
        return Err(KeeperError::InvalidInput("login is empty".to_string()));
    }
    if password.is_empty() {
        return Err(KeeperError::InvalidInput("password is empty".to_string()));
    }
    Ok(())
}

impl ApiClient {
    /// Create an account on the server and sign in locally.
    pub async fn sign_up(&self, login: &str, password: &str) -> Result<UserInfo> {
        check_credentials(login, password)?;
        let hash = identity_hash(login, password);
        let token = self
            .register(&IdentityData {
                login: login.to_string(),
                hash: hash.clone(),
            })
            .await?;

        let store = self.store();
        let id = store.next_user_id()?;
        let user = if store.register(login, &hash, id, &token)? {
            store
                .authorize(login)?
                .ok_or_else(|| KeeperError::Invariant("auth row vanished".to_string()))?
        } else {
            // A leftover row from an account that no longer exists on the server.
            warn!("Replacing stale local account for {}", login);
            store.upsert_user(login, &hash, &token)?
        };

        let info = UserInfo {
            login: login.to_string(),
            password: password.to_string(),
            key: derive_key(password.as_bytes(), KEY_LEN)?,
            user_id: user.id,
            token,
        };
        self.session().set(info.clone()).await;
        info!("Registered {}", login);
        Ok(info)
    }

    /// Sign in, falling back to the local auth row when the server cannot
    /// be reached.
    pub async fn sign_in(&self, login: &str, password: &str) -> Result<(UserInfo, LoginMode)> {
        check_credentials(login, password)?;
        let hash = identity_hash(login, password);
        let identity = IdentityData {
            login: login.to_string(),
            hash: hash.clone(),
        };

        let (user, mode) = match self.authorize(&identity).await {
            Ok(token) => (self.store().upsert_user(login, &hash, &token)?, LoginMode::Online),
            Err(e) if e.is_recoverable() => {
                warn!("Server unreachable ({}), trying offline login", e);
                let user = self.store().authorize(login)?.ok_or_else(|| {
                    KeeperError::Auth("server unreachable and no local account".to_string())
                })?;
                if user.hash != hash {
                    return Err(KeeperError::Auth("wrong login or password".to_string()));
                }
                (user, LoginMode::Offline)
            }
            Err(e) => return Err(e),
        };

        let info = UserInfo {
            login: login.to_string(),
            password: password.to_string(),
            key: derive_key(password.as_bytes(), KEY_LEN)?,
            user_id: user.id,
            token: user.token,
        };
        self.session().set(info.clone()).await;
        info!("Signed in {} ({:?})", login, mode);
        Ok((info, mode))
    }
}
