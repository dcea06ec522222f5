//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `users`, `files`, `collaborators`, and
//! `invites`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (identities)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    username    TEXT NOT NULL UNIQUE,
    certificate TEXT NOT NULL,               -- SPKI PEM public-key credential
    created_at  TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Files
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS files (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    path        TEXT NOT NULL,               -- vault-relative ciphertext path
    version     INTEGER NOT NULL DEFAULT 1,
    owner_id    INTEGER NOT NULL,
    modifier_id INTEGER NOT NULL,            -- identity behind the current ciphertext
    signature   BLOB NOT NULL,               -- over the stored ciphertext
    created_at  TEXT NOT NULL,

    UNIQUE (owner_id, name),
    FOREIGN KEY (owner_id) REFERENCES users(id),
    FOREIGN KEY (modifier_id) REFERENCES users(id)
);

-- ----------------------------------------------------------------
-- Collaborator sets (always contain the owner)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS collaborators (
    file_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,

    PRIMARY KEY (file_id, user_id),
    FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_collaborators_user ON collaborators(user_id);

-- ----------------------------------------------------------------
-- Invites
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS invites (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL,            -- the invitee
    file_id     INTEGER NOT NULL,
    wrapped_key BLOB NOT NULL,
    accepted    INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at  TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id),
    FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
);

-- At most one unaccepted invite per (invitee, file).
CREATE UNIQUE INDEX IF NOT EXISTS idx_invites_pending
    ON invites(user_id, file_id) WHERE accepted = 0;
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
