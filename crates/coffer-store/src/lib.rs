//! # coffer-store
//!
//! Server-side persistence for identities, file records, collaborator sets
//! and invites, backed by SQLite. The crate exposes a synchronous `Database`
//! handle that wraps a `rusqlite::Connection` and provides typed CRUD helpers
//! for every domain model. Multi-step writes (version increments, share
//! rotation) run inside explicit transactions so no other writer can
//! interleave.

pub mod database;
pub mod files;
pub mod invites;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
