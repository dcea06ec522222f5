//! CRUD operations for [`FileRecord`] rows and collaborator sets.
//!
//! File records are only reachable through collaborator membership; there is
//! deliberately no "list all files" query. Writes that touch version,
//! signature and modifier together run inside one transaction so two
//! concurrent uploads can never interleave their increments.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{FileRecord, UserRecord};
use crate::users::row_to_user;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new file at version 1. The owner is also the first modifier
    /// and the sole collaborator; both rows are written in one transaction.
    pub fn create_file(
        &mut self,
        owner_id: i64,
        name: &str,
        path: &str,
        signature: &[u8],
    ) -> Result<FileRecord> {
        let created_at = Utc::now();
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO files (name, path, version, owner_id, modifier_id, signature, created_at)
             VALUES (?1, ?2, 1, ?3, ?3, ?4, ?5)",
            params![name, path, owner_id, signature, created_at.to_rfc3339()],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO collaborators (file_id, user_id) VALUES (?1, ?2)",
            params![id, owner_id],
        )?;

        tx.commit()?;

        Ok(FileRecord {
            id,
            name: name.to_string(),
            path: path.to_string(),
            version: 1,
            owner_id,
            modifier_id: owner_id,
            signature: signature.to_vec(),
            created_at,
        })
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Apply an accepted overwrite: version +1, new signature, new modifier,
    /// atomically. Returns the new version.
    pub fn update_file(&mut self, file_id: i64, signature: &[u8], modifier_id: i64) -> Result<i64> {
        let tx = self.conn_mut().transaction()?;

        let affected = tx.execute(
            "UPDATE files SET version = version + 1, signature = ?1, modifier_id = ?2
             WHERE id = ?3",
            params![signature, modifier_id, file_id],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        let version: i64 = tx.query_row(
            "SELECT version FROM files WHERE id = ?1",
            params![file_id],
            |row| row.get(0),
        )?;

        tx.commit()?;
        Ok(version)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch the file record for `(owner, name)`, if any.
    pub fn file_by_owner_and_name(&self, owner_id: i64, name: &str) -> Result<Option<FileRecord>> {
        match self.conn().query_row(
            "SELECT id, name, path, version, owner_id, modifier_id, signature, created_at
             FROM files
             WHERE owner_id = ?1 AND name = ?2",
            params![owner_id, name],
            row_to_file,
        ) {
            Ok(file) => Ok(Some(file)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Fetch a file by name through the caller's collaborator membership.
    /// This is the only read path for files the caller does not own.
    pub fn file_for_collaborator(&self, name: &str, user_id: i64) -> Result<Option<FileRecord>> {
        match self.conn().query_row(
            "SELECT f.id, f.name, f.path, f.version, f.owner_id, f.modifier_id,
                    f.signature, f.created_at
             FROM files f
             JOIN collaborators c ON c.file_id = f.id
             WHERE f.name = ?1 AND c.user_id = ?2
             ORDER BY f.id
             LIMIT 1",
            params![name, user_id],
            row_to_file,
        ) {
            Ok(file) => Ok(Some(file)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    // ------------------------------------------------------------------
    // Collaborator sets
    // ------------------------------------------------------------------

    /// Add a user to a file's collaborator set. Idempotent.
    pub fn add_collaborator(&self, file_id: i64, user_id: i64) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO collaborators (file_id, user_id) VALUES (?1, ?2)",
            params![file_id, user_id],
        )?;
        Ok(())
    }

    /// Whether a user belongs to a file's collaborator set.
    pub fn is_collaborator(&self, file_id: i64, user_id: i64) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM collaborators WHERE file_id = ?1 AND user_id = ?2",
            params![file_id, user_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// List a file's collaborators as full identity records.
    pub fn collaborators(&self, file_id: i64) -> Result<Vec<UserRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT u.id, u.username, u.certificate, u.created_at
             FROM users u
             JOIN collaborators c ON c.user_id = u.id
             WHERE c.file_id = ?1
             ORDER BY u.username ASC",
        )?;

        let rows = stmt.query_map(params![file_id], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Rotate a file's share: drop every collaborator and re-add the owner
    /// alone, in one transaction.
    pub fn reset_collaborators(&mut self, file_id: i64, owner_id: i64) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "DELETE FROM collaborators WHERE file_id = ?1",
            params![file_id],
        )?;
        tx.execute(
            "INSERT INTO collaborators (file_id, user_id) VALUES (?1, ?2)",
            params![file_id, owner_id],
        )?;
        tx.commit()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`FileRecord`].
fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let created_str: String = row.get(7)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(FileRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        version: row.get(3)?,
        owner_id: row.get(4)?,
        modifier_id: row.get(5)?,
        signature: row.get(6)?,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_users() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", "PEM-A").unwrap().id;
        let bob = db.create_user("bob", "PEM-B").unwrap().id;
        (db, alice, bob)
    }

    #[test]
    fn create_starts_at_version_one_with_owner_as_collaborator() {
        let (mut db, alice, _) = db_with_users();
        let file = db
            .create_file(alice, "report.txt.aes", "users/1/report.txt.aes", b"sig-1")
            .unwrap();

        assert_eq!(file.version, 1);
        assert_eq!(file.owner_id, alice);
        assert_eq!(file.modifier_id, alice);
        assert!(db.is_collaborator(file.id, alice).unwrap());
    }

    #[test]
    fn update_increments_version_and_swaps_modifier() {
        let (mut db, alice, bob) = db_with_users();
        let file = db
            .create_file(alice, "report.txt.aes", "users/1/report.txt.aes", b"sig-1")
            .unwrap();

        let v2 = db.update_file(file.id, b"sig-2", bob).unwrap();
        assert_eq!(v2, 2);
        let v3 = db.update_file(file.id, b"sig-3", alice).unwrap();
        assert_eq!(v3, 3);

        let reloaded = db
            .file_by_owner_and_name(alice, "report.txt.aes")
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.version, 3);
        assert_eq!(reloaded.modifier_id, alice);
        assert_eq!(reloaded.signature, b"sig-3");
    }

    #[test]
    fn update_missing_file_is_not_found() {
        let (mut db, _, _) = db_with_users();
        assert!(matches!(
            db.update_file(999, b"sig", 1),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn files_only_reachable_through_membership() {
        let (mut db, alice, bob) = db_with_users();
        let file = db
            .create_file(alice, "secret.aes", "users/1/secret.aes", b"sig")
            .unwrap();

        assert!(db.file_for_collaborator("secret.aes", alice).unwrap().is_some());
        assert!(db.file_for_collaborator("secret.aes", bob).unwrap().is_none());

        db.add_collaborator(file.id, bob).unwrap();
        assert!(db.file_for_collaborator("secret.aes", bob).unwrap().is_some());
    }

    #[test]
    fn add_collaborator_is_idempotent() {
        let (mut db, alice, bob) = db_with_users();
        let file = db
            .create_file(alice, "doc.aes", "users/1/doc.aes", b"sig")
            .unwrap();

        db.add_collaborator(file.id, bob).unwrap();
        db.add_collaborator(file.id, bob).unwrap();

        assert_eq!(db.collaborators(file.id).unwrap().len(), 2);
    }

    #[test]
    fn reset_collaborators_keeps_owner_only() {
        let (mut db, alice, bob) = db_with_users();
        let file = db
            .create_file(alice, "doc.aes", "users/1/doc.aes", b"sig")
            .unwrap();
        db.add_collaborator(file.id, bob).unwrap();

        db.reset_collaborators(file.id, alice).unwrap();

        let remaining = db.collaborators(file.id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, alice);
    }
}
