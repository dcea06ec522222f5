use std::sync::Arc;

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, Path, State},
    http::request::Parts,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use coffer_shared::constants::{MAX_FILE_SIZE, UNAUTHENTICATED};
use coffer_shared::protocol::{
    AcceptRequest, AcceptResponse, DownloadResponse, InviteRequest, NumberRequest, NumberResponse,
    RegisterRequest, RemoveRequest, RemoveResponse, ShareResponse, TokenRequest, TokenResponse,
    UploadRequest, UploadResponse,
};

use crate::auth::AuthService;
use crate::error::ServerError;
use crate::files::FileService;
use crate::invites::InviteService;
use crate::replication::Replicator;
use crate::vault::FileVault;

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub files: Arc<FileService>,
    pub invites: Arc<InviteService>,
    pub vault: Arc<FileVault>,
    pub replicator: Arc<Replicator>,
}

/// The request-scoped caller identity, resolved from the bearer token.
/// Extraction never fails: an absent or invalid token yields the sentinel
/// id, which protected handlers reject via [`Principal::require`].
pub struct Principal {
    pub id: i64,
    pub token: Option<String>,
}

impl Principal {
    fn require(&self) -> Result<i64, ServerError> {
        if self.id == UNAUTHENTICATED {
            return Err(ServerError::Unauthenticated);
        }
        Ok(self.id)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);

        let id = state.auth.authenticate(token.as_deref());
        Ok(Principal { id, token })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/number", post(get_number))
        .route("/token", post(get_token))
        .route("/upload", post(upload))
        .route("/download/:name", get(download))
        .route("/share/:username", get(share))
        .route("/invite", post(invite))
        .route("/accept", post(accept))
        .route("/remove", post(remove))
        .route("/ping", get(ping))
        // Ciphertext crosses the wire as a JSON byte array, roughly 4x its size.
        .layer(DefaultBodyLimit::max(MAX_FILE_SIZE * 4))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Identity & session
// ---------------------------------------------------------------------------

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state
        .replicator
        .forward("/register", serde_json::to_value(&req)?, None)
        .await;

    let user = state.auth.register(&req.username, &req.certificate_pem).await?;
    state.vault.ensure_user_dir(user.id).await?;

    Ok(Json(serde_json::json!({})))
}

async fn get_number(
    State(state): State<AppState>,
    Json(req): Json<NumberRequest>,
) -> Result<Json<NumberResponse>, ServerError> {
    let nonce = state.auth.issue_challenge(&req.username).await?;
    Ok(Json(NumberResponse { nonce }))
}

async fn get_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ServerError> {
    let (token, pending_invites) = state
        .auth
        .verify_challenge(&req.username, &req.signed_nonce)
        .await?;
    Ok(Json(TokenResponse {
        token,
        pending_invites,
    }))
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

async fn upload(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, ServerError> {
    let caller = principal.require()?;

    state
        .replicator
        .forward("/upload", serde_json::to_value(&req)?, principal.token.as_deref())
        .await;

    let version = state.files.upload(caller, &req).await?;
    Ok(Json(UploadResponse { version }))
}

async fn download(
    State(state): State<AppState>,
    principal: Principal,
    Path(name): Path<String>,
) -> Result<Json<DownloadResponse>, ServerError> {
    let caller = principal.require()?;
    let response = state.files.download(caller, &name).await?;
    Ok(Json(response))
}

async fn share(
    State(state): State<AppState>,
    principal: Principal,
    Path(username): Path<String>,
) -> Result<Json<ShareResponse>, ServerError> {
    principal.require()?;
    let certificate_pem = state.files.share(&username).await?;
    Ok(Json(ShareResponse { certificate_pem }))
}

async fn remove(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<RemoveRequest>,
) -> Result<Json<RemoveResponse>, ServerError> {
    let caller = principal.require()?;

    state
        .replicator
        .forward("/remove", serde_json::to_value(&req)?, principal.token.as_deref())
        .await;

    let collaborators = state
        .files
        .remove(caller, &req.username, &req.file_name)
        .await?;
    Ok(Json(RemoveResponse { collaborators }))
}

// ---------------------------------------------------------------------------
// Invites
// ---------------------------------------------------------------------------

async fn invite(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<InviteRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = principal.require()?;

    state
        .replicator
        .forward("/invite", serde_json::to_value(&req)?, principal.token.as_deref())
        .await;

    state
        .invites
        .invite(caller, &req.username, &req.file_name, &req.wrapped_key)
        .await?;
    Ok(Json(serde_json::json!({})))
}

async fn accept(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<AcceptRequest>,
) -> Result<Json<AcceptResponse>, ServerError> {
    let caller = principal.require()?;

    state
        .replicator
        .forward("/accept", serde_json::to_value(&req)?, principal.token.as_deref())
        .await;

    let wrapped_key = state.invites.accept(caller, &req.file_name).await?;
    Ok(Json(AcceptResponse { wrapped_key }))
}

// ---------------------------------------------------------------------------
// Replication probe
// ---------------------------------------------------------------------------

/// Heartbeat target for the backup. Carries no data on purpose.
async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({}))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
