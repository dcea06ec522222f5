//! Primary–backup replication.
//!
//! A primary forwards every mutating request to the registered backup
//! *before* committing locally; forwarding is best-effort and never fails
//! the client-facing call. A backup heartbeats the primary and, after enough
//! consecutive failures, takes over its naming registration. Promotion is
//! one-shot and irreversible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use coffer_net::{NetError, Naming};
use coffer_shared::constants::{BACKUP_NODE, PRIMARY_NODE};

use crate::config::{Role, ServerConfig};

pub struct Replicator {
    naming: Naming,
    http: reqwest::Client,
    advertise_uri: String,
    starts_as_primary: bool,
    promoted: AtomicBool,
    ping_interval: Duration,
    failure_threshold: u32,
}

impl Replicator {
    pub fn new(naming: Naming, config: &ServerConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_default();

        Self {
            naming,
            http,
            advertise_uri: config.advertise_uri.trim_end_matches('/').to_string(),
            starts_as_primary: config.role == Role::Primary,
            promoted: AtomicBool::new(false),
            ping_interval: config.ping_interval,
            failure_threshold: config.ping_failure_threshold,
        }
    }

    /// Whether this node currently serves as primary (configured as such, or
    /// promoted from backup).
    pub fn is_primary(&self) -> bool {
        self.starts_as_primary || self.promoted.load(Ordering::SeqCst)
    }

    /// Register this node under its startup role in the naming service.
    pub async fn register_in_naming(&self) -> Result<(), NetError> {
        let node = if self.starts_as_primary {
            PRIMARY_NODE
        } else {
            BACKUP_NODE
        };
        self.naming.rebind(node, &self.advertise_uri).await?;
        info!(node, uri = %self.advertise_uri, "registered in naming service");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Write forwarding (primary side)
    // ------------------------------------------------------------------

    /// Forward a mutating request verbatim to the current backup, carrying
    /// the caller's own bearer token. Called before the local commit. Any
    /// failure is logged and swallowed: replication is at-least-once,
    /// best-effort, and must never fail the client call.
    pub async fn forward(&self, path: &str, body: serde_json::Value, token: Option<&str>) {
        if !self.is_primary() {
            return;
        }

        let backup = match self.naming.lookup(BACKUP_NODE).await {
            Ok(uri) => uri,
            Err(e) => {
                warn!(path, error = %e, "no backup registered, skipping replication");
                return;
            }
        };
        if backup.trim_end_matches('/') == self.advertise_uri {
            return;
        }

        let url = format!("{}{}", backup.trim_end_matches('/'), path);
        let mut req = self.http.post(&url).json(&body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }

        match req.send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(path, backup = %backup, "replicated to backup");
            }
            Ok(resp) => {
                warn!(
                    path,
                    backup = %backup,
                    status = %resp.status(),
                    "backup rejected forwarded request"
                );
            }
            Err(e) => {
                warn!(path, backup = %backup, error = %e, "failed to reach backup");
            }
        }
    }

    // ------------------------------------------------------------------
    // Heartbeat and promotion (backup side)
    // ------------------------------------------------------------------

    async fn ping_primary(&self) -> Result<(), NetError> {
        let primary = self.naming.lookup(PRIMARY_NODE).await?;
        let url = format!("{}/ping", primary.trim_end_matches('/'));

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| NetError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NetError::Unavailable(format!(
                "primary answered {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Run the backup heartbeat until promotion. Spawned once per backup
    /// process; returns immediately on a primary. The loop sleeps between
    /// pings, resets its failure count on any success, and promotes after
    /// `failure_threshold` consecutive failures.
    pub async fn heartbeat_loop(self: Arc<Self>) {
        if self.starts_as_primary {
            return;
        }

        info!(
            interval = ?self.ping_interval,
            threshold = self.failure_threshold,
            "heartbeat started"
        );

        let mut failures: u32 = 0;
        loop {
            if self.promoted.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(self.ping_interval).await;

            match self.ping_primary().await {
                Ok(()) => {
                    failures = 0;
                }
                Err(e) => {
                    failures += 1;
                    warn!(failures, error = %e, "primary ping failed");
                    if failures >= self.failure_threshold {
                        self.promote().await;
                        return;
                    }
                }
            }
        }
    }

    /// Take over the primary registration. Runs at most once per process
    /// lifetime; there is no demotion path.
    async fn promote(&self) {
        info!("primary unreachable, promoting self to primary");

        if let Err(e) = self.naming.unbind(BACKUP_NODE, &self.advertise_uri).await {
            warn!(error = %e, "failed to unbind backup registration");
        }
        match self.naming.rebind(PRIMARY_NODE, &self.advertise_uri).await {
            Ok(()) => {
                self.promoted.store(true, Ordering::SeqCst);
                info!(uri = %self.advertise_uri, "now serving as primary");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to rebind as primary");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_net::MemoryNaming;
    use std::path::PathBuf;

    fn backup_config(advertise: &str) -> ServerConfig {
        ServerConfig {
            http_addr: ([127, 0, 0, 1], 0).into(),
            advertise_uri: advertise.to_string(),
            role: Role::Backup,
            naming_url: None,
            data_dir: PathBuf::from("."),
            token_key_path: PathBuf::from("./token_key.pem"),
            ping_interval: Duration::from_millis(10),
            ping_failure_threshold: 3,
        }
    }

    #[tokio::test]
    async fn test_backup_promotes_after_consecutive_failures() {
        let naming = Naming::Memory(MemoryNaming::new());
        // Nothing listens on port 1: every ping fails with connection refused.
        naming
            .rebind(PRIMARY_NODE, "http://127.0.0.1:1")
            .await
            .unwrap();

        let config = backup_config("http://127.0.0.1:39999");
        let replicator = Arc::new(Replicator::new(naming.clone(), &config));
        replicator.register_in_naming().await.unwrap();
        assert!(!replicator.is_primary());

        tokio::time::timeout(Duration::from_secs(30), replicator.clone().heartbeat_loop())
            .await
            .expect("heartbeat should terminate by promoting");

        assert!(replicator.is_primary());
        assert_eq!(
            naming.lookup(PRIMARY_NODE).await.unwrap(),
            "http://127.0.0.1:39999"
        );
        assert!(naming.lookup(BACKUP_NODE).await.is_err());
    }

    #[tokio::test]
    async fn test_promotion_is_terminal() {
        let naming = Naming::Memory(MemoryNaming::new());
        naming
            .rebind(PRIMARY_NODE, "http://127.0.0.1:1")
            .await
            .unwrap();

        let config = backup_config("http://127.0.0.1:39998");
        let replicator = Arc::new(Replicator::new(naming.clone(), &config));
        replicator.register_in_naming().await.unwrap();

        tokio::time::timeout(Duration::from_secs(30), replicator.clone().heartbeat_loop())
            .await
            .expect("first heartbeat run should promote");

        // A second heartbeat run observes the terminal state and exits at
        // once instead of pinging or re-promoting.
        tokio::time::timeout(Duration::from_secs(1), replicator.clone().heartbeat_loop())
            .await
            .expect("promoted heartbeat must be a no-op");
        assert!(replicator.is_primary());
    }

    #[tokio::test]
    async fn test_primary_never_runs_heartbeat() {
        let naming = Naming::Memory(MemoryNaming::new());
        let mut config = backup_config("http://127.0.0.1:39997");
        config.role = Role::Primary;

        let replicator = Arc::new(Replicator::new(naming, &config));
        assert!(replicator.is_primary());

        tokio::time::timeout(Duration::from_millis(100), replicator.clone().heartbeat_loop())
            .await
            .expect("primary heartbeat returns immediately");
    }
}
