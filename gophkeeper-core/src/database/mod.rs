//! Local ciphertext store for the agent.
//!
//! Records are kept sealed. A record row owns an ordered list of versions in
//! `user_data_versions`; only a mirrored server conflict has more than one.

pub mod store;

pub use store::{LocalUser, MirrorOutcome, StoredRecord};

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Store failures other than unique-key violations, which are reported as
/// `Ok(false)` by the operations that can hit them.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Thread-safe handle to the agent's SQLite database.
#[derive(Clone)]
pub struct AgentStore {
    conn: Arc<Mutex<Connection>>,
}

impl AgentStore {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create a new in-memory store for testing
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS auth (
                login TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                id INTEGER NOT NULL UNIQUE,
                token TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                status INTEGER NOT NULL,
                base_edit_date INTEGER,
                UNIQUE (user_id, name)
            );

            CREATE TABLE IF NOT EXISTS user_data_versions (
                record_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                encrypted_data BLOB NOT NULL,
                create_date INTEGER NOT NULL,
                edit_date INTEGER NOT NULL,
                PRIMARY KEY (record_id, position),
                FOREIGN KEY (record_id) REFERENCES user_data(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_user_data_status
                ON user_data(user_id, status);",
        )?;
        Ok(())
    }

    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn
            .lock()
            .map_err(|e| DatabaseError::LockPoisoned(e.to_string()))
    }
}

/// Whether `e` is a UNIQUE or PRIMARY KEY violation.
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}
