//! Per-user record version lists.
//!
//! A record is one `user_data` row keyed by `(user_id, name)` and an ordered
//! list of `user_data_versions`. Only `append` makes the list longer than
//! one.

use super::models::{EncryptedRecord, ReplaceOutcome, STATUS_CONFLICT, STATUS_SAVED};
use super::{from_unix, is_foreign_key_violation, is_unique_violation, ServerStorage};
use crate::error::ServerError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

fn insert_version(
    conn: &Connection,
    record_id: i64,
    position: i64,
    record: &EncryptedRecord,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO user_data_versions
            (record_id, position, encrypted_data, create_date, edit_date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record_id,
            position,
            record.encrypted_data,
            record.create_data.timestamp(),
            record.edit_date.timestamp(),
        ],
    )?;
    Ok(())
}

fn record_id(conn: &Connection, user_id: i64, name: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM user_data WHERE user_id = ?1 AND name = ?2",
        params![user_id, name],
        |row| row.get(0),
    )
    .optional()
}

/// Overwrite the version list of `id` with `[record]`.
fn overwrite(conn: &Connection, id: i64, record: &EncryptedRecord) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM user_data_versions WHERE record_id = ?1", [id])?;
    insert_version(conn, id, 0, record)?;
    conn.execute(
        "UPDATE user_data SET status = ?1 WHERE id = ?2",
        params![STATUS_SAVED, id],
    )?;
    Ok(())
}

impl ServerStorage {
    /// Insert a single-version record. Returns `false` if the name exists
    /// and `NotFound` if the user does not.
    pub fn add(&self, user_id: i64, record: &EncryptedRecord) -> Result<bool, ServerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        match tx.execute(
            "INSERT INTO user_data (user_id, name, status) VALUES (?1, ?2, ?3)",
            params![user_id, record.name, STATUS_SAVED],
        ) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Ok(false),
            Err(e) if is_foreign_key_violation(&e) => {
                return Err(ServerError::NotFound(format!("User {} not found", user_id)))
            }
            Err(e) => return Err(e.into()),
        }
        let id = tx.last_insert_rowid();
        insert_version(&tx, id, 0, record)?;
        tx.commit()?;
        Ok(true)
    }

    /// Unconditionally replace the version list with `[record]`.
    pub fn replace(&self, user_id: i64, record: &EncryptedRecord) -> Result<bool, ServerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let Some(id) = record_id(&tx, user_id, &record.name)? else {
            return Ok(false);
        };
        overwrite(&tx, id, record)?;
        tx.commit()?;
        Ok(true)
    }

    /// Replace only if the server holds exactly one version whose
    /// `edit_date` equals `base`. A `None` base never matches.
    ///
    /// A single version identical to `record` counts as already replaced, so
    /// a push whose response was lost settles on retry.
    pub fn replace_if(
        &self,
        user_id: i64,
        record: &EncryptedRecord,
        base: Option<DateTime<Utc>>,
    ) -> Result<ReplaceOutcome, ServerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let Some(id) = record_id(&tx, user_id, &record.name)? else {
            return Ok(ReplaceOutcome::Missing);
        };

        let versions: Vec<(Vec<u8>, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT encrypted_data, edit_date FROM user_data_versions
                 WHERE record_id = ?1 ORDER BY position",
            )?;
            let rows = stmt.query_map([id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        let (data, edit_date) = match versions.as_slice() {
            [current] => current,
            _ => return Ok(ReplaceOutcome::Conflict),
        };
        if *data == record.encrypted_data && *edit_date == record.edit_date.timestamp() {
            return Ok(ReplaceOutcome::Replaced);
        }
        if base.map(|b| b.timestamp()) != Some(*edit_date) {
            return Ok(ReplaceOutcome::Conflict);
        }

        overwrite(&tx, id, record)?;
        tx.commit()?;
        Ok(ReplaceOutcome::Replaced)
    }

    /// Append `record` as an extra version and mark the record conflicted.
    /// A version identical to `record` is not added twice.
    pub fn append(&self, user_id: i64, record: &EncryptedRecord) -> Result<bool, ServerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let Some(id) = record_id(&tx, user_id, &record.name)? else {
            return Ok(false);
        };
        let duplicate: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM user_data_versions
             WHERE record_id = ?1 AND encrypted_data = ?2 AND edit_date = ?3)",
            params![id, record.encrypted_data, record.edit_date.timestamp()],
            |row| row.get(0),
        )?;
        if duplicate {
            return Ok(true);
        }
        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM user_data_versions WHERE record_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        insert_version(&tx, id, next, record)?;
        tx.execute(
            "UPDATE user_data SET status = ?1 WHERE id = ?2",
            params![STATUS_CONFLICT, id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Every record of the user, one version list per name.
    pub fn get_all(&self, user_id: i64) -> Result<Vec<Vec<EncryptedRecord>>, ServerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT d.name, v.encrypted_data, v.create_date, v.edit_date
             FROM user_data d JOIN user_data_versions v ON v.record_id = d.id
             WHERE d.user_id = ?1
             ORDER BY d.name, v.position",
        )?;
        let rows = stmt.query_map([user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut grouped: BTreeMap<String, Vec<EncryptedRecord>> = BTreeMap::new();
        for row in rows {
            let (name, encrypted_data, create, edit) = row?;
            grouped.entry(name.clone()).or_default().push(EncryptedRecord {
                encrypted_data,
                name,
                create_data: from_unix(create)?,
                edit_date: from_unix(edit)?,
            });
        }
        Ok(grouped.into_values().collect())
    }

    pub fn delete(&self, user_id: i64, name: &str) -> Result<bool, ServerError> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM user_data WHERE user_id = ?1 AND name = ?2",
            params![user_id, name],
        )?;
        Ok(n > 0)
    }

    /// Stored status of a record, for diagnostics and tests.
    pub fn status(&self, user_id: i64, name: &str) -> Result<Option<i64>, ServerError> {
        let conn = self.conn()?;
        let status = conn
            .query_row(
                "SELECT status FROM user_data WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }
}
