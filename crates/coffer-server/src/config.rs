//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a standalone primary can start with
//! zero configuration for local development. A real primary/backup pair needs
//! `ROLE`, `NAMING_URL`, `ADVERTISE_URI` and a shared `TOKEN_KEY_PATH`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use coffer_shared::constants::{DEFAULT_HTTP_PORT, PING_FAILURE_THRESHOLD, PING_INTERVAL_SECS};

/// Which replica role this process starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Backup,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// URI under which *other* nodes reach this server; registered in the
    /// naming service at startup.
    /// Env: `ADVERTISE_URI`
    /// Default: `http://127.0.0.1:8080`
    pub advertise_uri: String,

    /// Replica role at startup. A backup may later promote itself.
    /// Env: `ROLE` (`primary` / `backup`)
    /// Default: `primary`
    pub role: Role,

    /// Base URL of the HTTP naming registry. When unset the server runs
    /// standalone with an in-process naming map (no replication partner).
    /// Env: `NAMING_URL`
    pub naming_url: Option<String>,

    /// Directory holding the database and the ciphertext vault.
    /// Env: `DATA_DIR`
    /// Default: `./data`
    pub data_dir: PathBuf,

    /// RSA private key (PKCS#8 PEM) used to sign session tokens. Both
    /// replicas must share this file so either honors the other's tokens.
    /// Generated on first start if missing.
    /// Env: `TOKEN_KEY_PATH`
    /// Default: `./token_key.pem`
    pub token_key_path: PathBuf,

    /// Interval between backup-to-primary heartbeat pings.
    /// Env: `PING_INTERVAL_SECS`
    /// Default: 5
    pub ping_interval: Duration,

    /// Consecutive failed pings before the backup promotes itself.
    /// Env: `PING_FAILURE_THRESHOLD`
    /// Default: 3
    pub ping_failure_threshold: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            advertise_uri: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            role: Role::Primary,
            naming_url: None,
            data_dir: PathBuf::from("./data"),
            token_key_path: PathBuf::from("./token_key.pem"),
            ping_interval: Duration::from_secs(PING_INTERVAL_SECS),
            ping_failure_threshold: PING_FAILURE_THRESHOLD,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(uri) = std::env::var("ADVERTISE_URI") {
            config.advertise_uri = uri;
        }

        if let Ok(role) = std::env::var("ROLE") {
            match role.to_ascii_lowercase().as_str() {
                "primary" => config.role = Role::Primary,
                "backup" => config.role = Role::Backup,
                other => {
                    tracing::warn!(value = %other, "Invalid ROLE, using default (primary)");
                }
            }
        }

        if let Ok(url) = std::env::var("NAMING_URL") {
            if !url.is_empty() {
                config.naming_url = Some(url);
            }
        }

        if let Ok(path) = std::env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("TOKEN_KEY_PATH") {
            config.token_key_path = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("PING_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.ping_interval = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("PING_FAILURE_THRESHOLD") {
            if let Ok(n) = val.parse::<u32>() {
                config.ping_failure_threshold = n;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.role, Role::Primary);
        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.ping_failure_threshold, 3);
        assert!(config.naming_url.is_none());
    }
}
