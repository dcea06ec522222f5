//! Database handle: opens a connection, applies pragmas and runs migrations
//! before any CRUD helper can touch it.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::error::Result;
use crate::migrations;

/// Owns the server's [`rusqlite::Connection`]; every typed CRUD helper hangs
/// off this struct.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database at an explicit path. The server keeps it
    /// inside its configured data directory.
    pub fn open_at(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// The underlying connection. Prefer the typed CRUD helpers; direct
    /// access is for ad-hoc queries only.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access to the connection, needed to start transactions.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Filesystem path of the open database, if it is file-backed.
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
    }

    #[test]
    fn open_in_memory_runs_migrations() {
        let db = Database::open_in_memory().expect("should open");
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
