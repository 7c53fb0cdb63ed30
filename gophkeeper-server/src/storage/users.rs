//! Accounts and last-seen timestamps.

use super::models::StoredUser;
use super::{from_unix, is_unique_violation, ServerStorage};
use crate::error::ServerError;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rusqlite::{params, OptionalExtension};

/// Hash a client identity hash into an Argon2id PHC string.
pub fn hash_identity(identity_hash: &str) -> Result<String, ServerError> {
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt)
        .map_err(|e| ServerError::Internal(format!("Salt encoding failed: {}", e)))?;
    Argon2::default()
        .hash_password(identity_hash.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServerError::Internal(format!("Hashing failed: {}", e)))
}

/// Check a client identity hash against a stored PHC string.
pub fn verify_identity(identity_hash: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(identity_hash.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!("Stored hash is not a PHC string: {}", e);
            false
        }
    }
}

impl ServerStorage {
    /// Create an account. Returns `None` when the login is taken.
    pub fn create_user(
        &self,
        login: &str,
        identity_hash: &str,
    ) -> Result<Option<StoredUser>, ServerError> {
        let hash = hash_identity(identity_hash)?;
        let now = Utc::now().timestamp();
        let conn = self.conn()?;

        match conn.execute(
            "INSERT INTO users (login, hash, created_at) VALUES (?1, ?2, ?3)",
            params![login, hash, now],
        ) {
            Ok(_) => Ok(Some(StoredUser {
                id: conn.last_insert_rowid(),
                login: login.to_string(),
                hash,
                created_at: now,
            })),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_user(&self, login: &str) -> Result<Option<StoredUser>, ServerError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, login, hash, created_at FROM users WHERE login = ?1",
                [login],
                |row| {
                    Ok(StoredUser {
                        id: row.get(0)?,
                        login: row.get(1)?,
                        hash: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn set_last_seen(&self, user_id: i64, instant: DateTime<Utc>) -> Result<(), ServerError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO visitors (user_id, last_seen) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET last_seen = excluded.last_seen",
            params![user_id, instant.timestamp()],
        )?;
        Ok(())
    }

    pub fn get_last_seen(&self, user_id: i64) -> Result<Option<DateTime<Utc>>, ServerError> {
        let conn = self.conn()?;
        let secs: Option<i64> = conn
            .query_row(
                "SELECT last_seen FROM visitors WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        secs.map(from_unix).transpose()
    }
}
