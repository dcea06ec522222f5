//! # coffer-server
//!
//! Storage server for the coffer encrypted-file-sharing network.
//!
//! This binary provides:
//! - **Certificate-based registration** and challenge–response login that
//!   mints stateless signed session tokens
//! - **Versioned encrypted file storage** (the server only ever sees
//!   ciphertext and opaque signatures)
//! - **Key-sharing invites** that deliver RSA-wrapped file keys between
//!   collaborators
//! - **Primary/backup replication** with write forwarding, heartbeat pinging
//!   and one-shot self-promotion through an external naming service

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coffer_net::{HttpNaming, MemoryNaming, Naming};
use coffer_shared::constants::PRIMARY_NODE;
use coffer_shared::keys::Keypair;
use coffer_store::Database;

use coffer_server::api::{self, AppState};
use coffer_server::auth::AuthService;
use coffer_server::config::ServerConfig;
use coffer_server::files::FileService;
use coffer_server::invites::InviteService;
use coffer_server::replication::Replicator;
use coffer_server::vault::FileVault;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,coffer_server=debug")),
        )
        .init();

    info!("Starting coffer server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    std::fs::create_dir_all(&config.data_dir)?;

    let db = Database::open_at(&config.data_dir.join("coffer.db"))?;
    let db = Arc::new(Mutex::new(db));

    let vault = Arc::new(FileVault::new(config.data_dir.clone()).await.map_err(
        |e| anyhow::anyhow!("vault init failed: {e}"),
    )?);

    let token_key = load_or_generate_token_key(&config)?;

    let naming = match &config.naming_url {
        Some(url) => Naming::Http(HttpNaming::new(url.clone())),
        None => {
            // Standalone mode: this process is its own (only) registry.
            let naming = Naming::Memory(MemoryNaming::new());
            naming.rebind(PRIMARY_NODE, &config.advertise_uri).await.ok();
            naming
        }
    };

    let replicator = Arc::new(Replicator::new(naming.clone(), &config));

    let auth = Arc::new(AuthService::new(db.clone(), token_key));
    let files = Arc::new(FileService::new(db.clone(), vault.clone()));
    let invites = Arc::new(InviteService::new(db.clone()));

    let app_state = AppState {
        auth: auth.clone(),
        files,
        invites,
        vault,
        replicator: replicator.clone(),
    };

    // -----------------------------------------------------------------------
    // 4. Register in the naming service and spawn background tasks
    // -----------------------------------------------------------------------
    if let Err(e) = replicator.register_in_naming().await {
        warn!(error = %e, "could not register in naming service");
    }

    // Periodic challenge cache cleanup (every minute).
    let purge_auth = auth.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            purge_auth.challenges().purge_expired().await;
        }
    });

    // Backup-only heartbeat loop; returns immediately on a primary.
    tokio::spawn(replicator.clone().heartbeat_loop());

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

/// Load the token signing key, generating one on first start. Both replicas
/// must point at the same file or tokens issued by one will be rejected by
/// the other.
fn load_or_generate_token_key(config: &ServerConfig) -> anyhow::Result<Keypair> {
    if config.token_key_path.exists() {
        let key = Keypair::load(&config.token_key_path)
            .map_err(|e| anyhow::anyhow!("failed to load token key: {e}"))?;
        info!(path = %config.token_key_path.display(), "loaded token signing key");
        Ok(key)
    } else {
        let key =
            Keypair::generate().map_err(|e| anyhow::anyhow!("keygen failed: {e}"))?;
        key.save(&config.token_key_path)
            .map_err(|e| anyhow::anyhow!("failed to save token key: {e}"))?;
        warn!(
            path = %config.token_key_path.display(),
            "generated new token signing key; copy it to the other replica"
        );
        Ok(key)
    }
}
