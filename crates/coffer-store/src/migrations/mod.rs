//! Schema migration runner.
//!
//! Each migration is guarded by the `user_version` pragma and applied at most
//! once, in order, whenever a database is opened.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Schema version this build expects. Bump together with every new migration
/// module.
const CURRENT_VERSION: u32 = 1;

/// Bring an open connection up to [`CURRENT_VERSION`].
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let mut version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < CURRENT_VERSION {
        tracing::info!(from = version, to = CURRENT_VERSION, "migrating schema");
    }

    while version < CURRENT_VERSION {
        match version {
            0 => v001_initial::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?,
            other => {
                return Err(StoreError::Migration(format!(
                    "no migration registered for schema version {other}"
                )))
            }
        }
        version += 1;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}
