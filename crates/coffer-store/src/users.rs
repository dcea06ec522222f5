//! CRUD operations for [`UserRecord`] rows.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::UserRecord;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Register a new identity. Fails with [`StoreError::UsernameTaken`] if
    /// the username already exists.
    pub fn create_user(&self, username: &str, certificate_pem: &str) -> Result<UserRecord> {
        let created_at = Utc::now();
        self.conn()
            .execute(
                "INSERT INTO users (username, certificate, created_at)
                 VALUES (?1, ?2, ?3)",
                params![username, certificate_pem, created_at.to_rfc3339()],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::UsernameTaken
                }
                other => StoreError::Sqlite(other),
            })?;

        Ok(UserRecord {
            id: self.conn().last_insert_rowid(),
            username: username.to_string(),
            certificate_pem: certificate_pem.to_string(),
            created_at,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch an identity by username.
    pub fn user_by_username(&self, username: &str) -> Result<UserRecord> {
        self.conn()
            .query_row(
                "SELECT id, username, certificate, created_at
                 FROM users
                 WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Fetch an identity by id.
    pub fn user_by_id(&self, id: i64) -> Result<UserRecord> {
        self.conn()
            .query_row(
                "SELECT id, username, certificate, created_at
                 FROM users
                 WHERE id = ?1",
                params![id],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`UserRecord`].
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    let id: i64 = row.get(0)?;
    let username: String = row.get(1)?;
    let certificate_pem: String = row.get(2)?;
    let created_str: String = row.get(3)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(UserRecord {
        id,
        username,
        certificate_pem,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_fetch() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("alice", "PEM").unwrap();
        assert!(user.id >= 1);

        let by_name = db.user_by_username("alice").unwrap();
        assert_eq!(by_name, user);

        let by_id = db.user_by_id(user.id).unwrap();
        assert_eq!(by_id, user);
    }

    #[test]
    fn duplicate_username_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("alice", "PEM").unwrap();
        assert!(matches!(
            db.create_user("alice", "PEM2"),
            Err(StoreError::UsernameTaken)
        ));
    }

    #[test]
    fn missing_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.user_by_username("ghost"),
            Err(StoreError::NotFound)
        ));
    }
}
