/// AES-128 file key size in bytes
pub const FILE_KEY_SIZE: usize = 16;

/// AES-CBC initialization vector size in bytes
pub const IV_SIZE: usize = 16;

/// RSA modulus size for identity keypairs and the token signing key
pub const RSA_KEY_BITS: usize = 2048;

/// How long an issued login challenge stays answerable
pub const CHALLENGE_TTL_SECS: u64 = 60;

/// Interval between backup-to-primary heartbeat pings
pub const PING_INTERVAL_SECS: u64 = 5;

/// Consecutive failed pings before the backup promotes itself
pub const PING_FAILURE_THRESHOLD: u32 = 3;

/// Naming-service node names for the two replica roles
pub const PRIMARY_NODE: &str = "primary";
pub const BACKUP_NODE: &str = "backup";

/// Sentinel principal id for requests carrying no valid session token
pub const UNAUTHENTICATED: i64 = -1;

/// Suffix appended to a file name for its stored ciphertext
pub const ENCRYPTED_SUFFIX: &str = ".aes";

/// Maximum accepted upload size in bytes (50 MiB of ciphertext)
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Default HTTP port for a coffer server
pub const DEFAULT_HTTP_PORT: u16 = 8080;
