//! CRUD operations for [`InviteRecord`] rows.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::InviteRecord;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Store an invite. Fails with [`StoreError::DuplicateInvite`] if an
    /// unaccepted invite for the same user and file already exists (enforced
    /// by a partial unique index).
    pub fn create_invite(
        &self,
        user_id: i64,
        file_id: i64,
        wrapped_key: &[u8],
    ) -> Result<InviteRecord> {
        let created_at = Utc::now();
        self.conn()
            .execute(
                "INSERT INTO invites (user_id, file_id, wrapped_key, accepted, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![user_id, file_id, wrapped_key, created_at.to_rfc3339()],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::DuplicateInvite
                }
                other => StoreError::Sqlite(other),
            })?;

        Ok(InviteRecord {
            id: self.conn().last_insert_rowid(),
            user_id,
            file_id,
            wrapped_key: wrapped_key.to_vec(),
            accepted: false,
            created_at,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a user's unaccepted invite for a file name, if any.
    pub fn pending_invite(&self, user_id: i64, file_name: &str) -> Result<Option<InviteRecord>> {
        match self.conn().query_row(
            "SELECT i.id, i.user_id, i.file_id, i.wrapped_key, i.accepted, i.created_at
             FROM invites i
             JOIN files f ON f.id = i.file_id
             WHERE i.user_id = ?1 AND f.name = ?2 AND i.accepted = 0",
            params![user_id, file_name],
            row_to_invite,
        ) {
            Ok(invite) => Ok(Some(invite)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// File names of all unaccepted invites held by a user, oldest first.
    pub fn pending_invites_for_user(&self, user_id: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT f.name
             FROM invites i
             JOIN files f ON f.id = i.file_id
             WHERE i.user_id = ?1 AND i.accepted = 0
             ORDER BY i.id ASC",
        )?;

        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Consume an invite. The row is kept so history survives, but it can
    /// never satisfy another `accept`.
    pub fn mark_accepted(&self, invite_id: i64) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE invites SET accepted = 1 WHERE id = ?1",
            params![invite_id],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to an [`InviteRecord`].
fn row_to_invite(row: &rusqlite::Row<'_>) -> rusqlite::Result<InviteRecord> {
    let accepted: i64 = row.get(4)?;
    let created_str: String = row.get(5)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(InviteRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        file_id: row.get(2)?,
        wrapped_key: row.get(3)?,
        accepted: accepted != 0,
        created_at,
    })
}
