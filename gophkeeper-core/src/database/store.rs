//! Record and auth operations on the agent store.
//!
//! Every record operation is scoped by the local user id. Operations that
//! can hit `UNIQUE(user_id, name)` report it as `Ok(false)`; everything else
//! that goes wrong is an error.

use super::{is_unique_violation, AgentStore};
use crate::record::{from_unix, EncryptedRecord, RecordStatus};
use crate::{KeeperError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

/// Local auth row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub login: String,
    pub hash: String,
    pub id: i64,
    pub token: String,
}

/// A record as held in the store: its status and every sealed version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub name: String,
    pub status: RecordStatus,
    pub versions: Vec<EncryptedRecord>,
    /// `edit_date` of the server version this record was last in sync with.
    pub base_edit_date: Option<DateTime<Utc>>,
}

/// Result of [`AgentStore::mirror`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// Versions and status were rewritten.
    Replaced,
    /// The row already matched; nothing was written.
    Unchanged,
    /// No row with that name.
    Missing,
    /// The row holds an unpushed local edit and was left alone.
    Skipped(RecordStatus),
}

fn require_versions(versions: &[EncryptedRecord]) -> Result<()> {
    if versions.is_empty() {
        return Err(KeeperError::Invariant(
            "record must have at least one version".to_string(),
        ));
    }
    Ok(())
}

fn base_for(status: RecordStatus, versions: &[EncryptedRecord]) -> Option<i64> {
    match status {
        RecordStatus::Saved => versions.first().map(|v| v.edit_date.timestamp()),
        _ => None,
    }
}

fn insert_versions(
    tx: &Transaction<'_>,
    record_id: i64,
    versions: &[EncryptedRecord],
) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO user_data_versions
            (record_id, position, encrypted_data, create_date, edit_date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (position, version) in versions.iter().enumerate() {
        stmt.execute(params![
            record_id,
            position as i64,
            version.encrypted_data,
            version.create_data.timestamp(),
            version.edit_date.timestamp(),
        ])?;
    }
    Ok(())
}

fn load_versions(conn: &Connection, record_id: i64, name: &str) -> Result<Vec<EncryptedRecord>> {
    let mut stmt = conn.prepare(
        "SELECT encrypted_data, create_date, edit_date FROM user_data_versions
         WHERE record_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map([record_id], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(encrypted_data, create_date, edit_date)| {
            Ok(EncryptedRecord {
                encrypted_data,
                name: name.to_string(),
                create_data: from_unix(create_date)?,
                edit_date: from_unix(edit_date)?,
            })
        })
        .collect()
}

fn decode_status(value: i64) -> Result<RecordStatus> {
    RecordStatus::from_i64(value)
        .ok_or_else(|| KeeperError::Invariant(format!("unknown status code {}", value)))
}

fn find_row(conn: &Connection, user_id: i64, name: &str) -> Result<Option<(i64, RecordStatus)>> {
    let row = conn
        .query_row(
            "SELECT id, status FROM user_data WHERE user_id = ?1 AND name = ?2",
            params![user_id, name],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    match row {
        Some((id, status)) => Ok(Some((id, decode_status(status)?))),
        None => Ok(None),
    }
}

impl AgentStore {
    /// Insert a single-version record. Returns `false` if the name is taken.
    pub fn add(
        &self,
        user_id: i64,
        record: &EncryptedRecord,
        status: RecordStatus,
    ) -> Result<bool> {
        self.add_multi(user_id, std::slice::from_ref(record), status)
    }

    /// Insert a record with the given version list.
    pub fn add_multi(
        &self,
        user_id: i64,
        versions: &[EncryptedRecord],
        status: RecordStatus,
    ) -> Result<bool> {
        require_versions(versions)?;
        let name = &versions[0].name;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT INTO user_data (user_id, name, status, base_edit_date) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, name, status.as_i64(), base_for(status, versions)],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        let record_id = tx.last_insert_rowid();
        insert_versions(&tx, record_id, versions)?;
        tx.commit()?;
        Ok(true)
    }

    /// Rewrite the record as a single version. Returns `false` if absent.
    pub fn replace(
        &self,
        user_id: i64,
        record: &EncryptedRecord,
        status: RecordStatus,
    ) -> Result<bool> {
        self.replace_multi(user_id, std::slice::from_ref(record), status)
    }

    /// Rewrite the whole version list and the status. Returns `false` if
    /// absent.
    ///
    /// The in-sync base is moved to the first version when `status` is
    /// `SAVED` and kept otherwise.
    pub fn replace_multi(
        &self,
        user_id: i64,
        versions: &[EncryptedRecord],
        status: RecordStatus,
    ) -> Result<bool> {
        require_versions(versions)?;
        let name = &versions[0].name;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let Some((record_id, _)) = find_row(&tx, user_id, name)? else {
            return Ok(false);
        };
        rewrite(&tx, record_id, versions, status)?;
        tx.commit()?;
        Ok(true)
    }

    /// Mirror a server version list onto the local row in one transaction.
    ///
    /// Rows holding an unpushed edit are skipped and identical rows are not
    /// rewritten.
    pub fn mirror(
        &self,
        user_id: i64,
        versions: &[EncryptedRecord],
        status: RecordStatus,
    ) -> Result<MirrorOutcome> {
        require_versions(versions)?;
        let name = &versions[0].name;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let Some((record_id, current)) = find_row(&tx, user_id, name)? else {
            return Ok(MirrorOutcome::Missing);
        };
        if current.is_pending() {
            return Ok(MirrorOutcome::Skipped(current));
        }
        if current == status && load_versions(&tx, record_id, name)? == versions {
            return Ok(MirrorOutcome::Unchanged);
        }
        rewrite(&tx, record_id, versions, status)?;
        tx.commit()?;
        Ok(MirrorOutcome::Replaced)
    }

    /// Every record of the user, ordered by name.
    pub fn list(&self, user_id: i64) -> Result<Vec<StoredRecord>> {
        self.query_records(user_id, None)
    }

    /// One version list per record.
    pub fn get_all(&self, user_id: i64) -> Result<Vec<Vec<EncryptedRecord>>> {
        Ok(self
            .list(user_id)?
            .into_iter()
            .map(|r| r.versions)
            .collect())
    }

    pub fn get_by_status(
        &self,
        user_id: i64,
        status: RecordStatus,
    ) -> Result<Vec<Vec<EncryptedRecord>>> {
        Ok(self
            .query_records(user_id, Some(status))?
            .into_iter()
            .map(|r| r.versions)
            .collect())
    }

    /// Look up one record by name.
    pub fn get(&self, user_id: i64, name: &str) -> Result<Option<StoredRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, status, base_edit_date FROM user_data WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, status, base)) => Ok(Some(StoredRecord {
                name: name.to_string(),
                status: decode_status(status)?,
                versions: load_versions(&conn, id, name)?,
                base_edit_date: base.map(from_unix).transpose()?,
            })),
            None => Ok(None),
        }
    }

    pub fn get_status(&self, user_id: i64, name: &str) -> Result<Option<RecordStatus>> {
        let conn = self.conn()?;
        Ok(find_row(&conn, user_id, name)?.map(|(_, status)| status))
    }

    /// Set the status. Moving to `SAVED` also moves the in-sync base to the
    /// current first version.
    pub fn set_status(&self, user_id: i64, name: &str, status: RecordStatus) -> Result<bool> {
        let conn = self.conn()?;
        let updated = if status == RecordStatus::Saved {
            conn.execute(
                "UPDATE user_data SET status = ?1,
                    base_edit_date = (SELECT edit_date FROM user_data_versions
                                      WHERE record_id = user_data.id AND position = 0)
                 WHERE user_id = ?2 AND name = ?3",
                params![status.as_i64(), user_id, name],
            )?
        } else {
            conn.execute(
                "UPDATE user_data SET status = ?1 WHERE user_id = ?2 AND name = ?3",
                params![status.as_i64(), user_id, name],
            )?
        };
        Ok(updated > 0)
    }

    /// Set the status only if the row still holds exactly `pushed` as its
    /// single version. Returns `false` when the record was edited or removed
    /// meanwhile, in which case nothing changes.
    pub fn settle(
        &self,
        user_id: i64,
        pushed: &EncryptedRecord,
        status: RecordStatus,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let Some((record_id, _)) = find_row(&tx, user_id, &pushed.name)? else {
            return Ok(false);
        };
        let current = load_versions(&tx, record_id, &pushed.name)?;
        if current.len() != 1 || current[0] != *pushed {
            return Ok(false);
        }
        tx.execute(
            "UPDATE user_data SET status = ?1,
                base_edit_date = CASE WHEN ?2 IS NULL THEN base_edit_date ELSE ?2 END
             WHERE id = ?3",
            params![status.as_i64(), base_for(status, &current), record_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Mark a pending record as `CHANGED` relative to a server version it
    /// was pushed as, keeping its newer local edit.
    pub fn rebase(&self, user_id: i64, name: &str, base: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE user_data SET status = ?1, base_edit_date = ?2
             WHERE user_id = ?3 AND name = ?4 AND status IN (?5, ?6, ?7)",
            params![
                RecordStatus::Changed.as_i64(),
                base.timestamp(),
                user_id,
                name,
                RecordStatus::New.as_i64(),
                RecordStatus::Changed.as_i64(),
                RecordStatus::FixConflict.as_i64(),
            ],
        )?;
        Ok(updated > 0)
    }

    /// Delete `record` only if the row still matches it exactly.
    pub fn delete_exact(&self, user_id: i64, record: &StoredRecord) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let Some((record_id, status)) = find_row(&tx, user_id, &record.name)? else {
            return Ok(false);
        };
        if status != record.status
            || load_versions(&tx, record_id, &record.name)? != record.versions
        {
            return Ok(false);
        }
        tx.execute("DELETE FROM user_data WHERE id = ?1", [record_id])?;
        tx.commit()?;
        Ok(true)
    }

    pub fn delete(&self, user_id: i64, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM user_data WHERE user_id = ?1 AND name = ?2",
            params![user_id, name],
        )?;
        Ok(deleted > 0)
    }

    /// Insert an auth row. Returns `false` if the login or id is taken.
    pub fn register(&self, login: &str, hash: &str, id: i64, token: &str) -> Result<bool> {
        let conn = self.conn()?;
        match conn.execute(
            "INSERT INTO auth (login, hash, id, token) VALUES (?1, ?2, ?3, ?4)",
            params![login, hash, id, token],
        ) {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn authorize(&self, login: &str) -> Result<Option<LocalUser>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT login, hash, id, token FROM auth WHERE login = ?1",
                [login],
                |row| {
                    Ok(LocalUser {
                        login: row.get(0)?,
                        hash: row.get(1)?,
                        id: row.get(2)?,
                        token: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn set_token(&self, login: &str, token: &str) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE auth SET token = ?1 WHERE login = ?2",
            params![token, login],
        )?;
        Ok(updated > 0)
    }

    /// Next free local user id.
    pub fn next_user_id(&self) -> Result<i64> {
        let conn = self.conn()?;
        let max: Option<i64> = conn.query_row("SELECT MAX(id) FROM auth", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0) + 1)
    }

    /// Create the auth row for `login`, or refresh its hash and token after
    /// a successful server login.
    pub fn upsert_user(&self, login: &str, hash: &str, token: &str) -> Result<LocalUser> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row("SELECT id FROM auth WHERE login = ?1", [login], |row| row.get(0))
            .optional()?;
        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE auth SET hash = ?1, token = ?2 WHERE id = ?3",
                    params![hash, token, id],
                )?;
                id
            }
            None => {
                let max: Option<i64> =
                    tx.query_row("SELECT MAX(id) FROM auth", [], |row| row.get(0))?;
                let id = max.unwrap_or(0) + 1;
                tx.execute(
                    "INSERT INTO auth (login, hash, id, token) VALUES (?1, ?2, ?3, ?4)",
                    params![login, hash, id, token],
                )?;
                id
            }
        };
        tx.commit()?;
        Ok(LocalUser {
            login: login.to_string(),
            hash: hash.to_string(),
            id,
            token: token.to_string(),
        })
    }

    fn query_records(
        &self,
        user_id: i64,
        status: Option<RecordStatus>,
    ) -> Result<Vec<StoredRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, status, base_edit_date FROM user_data
             WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY name",
        )?;
        let rows = stmt
            .query_map(params![user_id, status.map(RecordStatus::as_i64)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, name, status, base)| {
                let versions = load_versions(&conn, id, &name)?;
                Ok(StoredRecord {
                    status: decode_status(status)?,
                    versions,
                    base_edit_date: base.map(from_unix).transpose()?,
                    name,
                })
            })
            .collect()
    }
}

fn rewrite(
    tx: &Transaction<'_>,
    record_id: i64,
    versions: &[EncryptedRecord],
    status: RecordStatus,
) -> Result<()> {
    tx.execute(
        "UPDATE user_data SET status = ?1,
            base_edit_date = CASE WHEN ?2 IS NULL THEN base_edit_date ELSE ?2 END
         WHERE id = ?3",
        params![status.as_i64(), base_for(status, versions), record_id],
    )?;
    tx.execute("DELETE FROM user_data_versions WHERE record_id = ?1", [record_id])?;
    insert_versions(tx, record_id, versions)?;
    Ok(())
}
