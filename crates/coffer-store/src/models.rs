//! Domain model structs persisted in the server database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A registered identity. The row id is the stable foreign key used by every
/// other table; the username is a unique lookup handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    /// SPKI PEM public-key credential presented at registration.
    pub certificate_pem: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// File record
// ---------------------------------------------------------------------------

/// A versioned encrypted file. The stored ciphertext lives in the vault at
/// `path`; `signature` always describes that ciphertext, produced by
/// `modifier_id`'s key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub name: String,
    /// Vault-relative storage path.
    pub path: String,
    /// Monotonic, starts at 1, +1 per accepted overwrite.
    pub version: i64,
    pub owner_id: i64,
    /// Identity that produced the current ciphertext.
    pub modifier_id: i64,
    pub signature: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Invite
// ---------------------------------------------------------------------------

/// A key-sharing invite. Consumed (marked accepted) at most once; the row is
/// kept afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteRecord {
    pub id: i64,
    /// The invited identity.
    pub user_id: i64,
    pub file_id: i64,
    /// File key wrapped under the invitee's certificate.
    pub wrapped_key: Vec<u8>,
    pub accepted: bool,
    pub created_at: DateTime<Utc>,
}
