//! Failover-aware HTTP client for the coffer RPC surface.
//!
//! The current primary is resolved through the naming service and cached.
//! Any transport failure or explicit 503 invalidates the cache and the
//! identical call is retried against a freshly resolved primary, so a client
//! survives a backup promotion without its caller noticing more than latency.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use coffer_shared::constants::PRIMARY_NODE;
use coffer_shared::protocol::{
    AcceptRequest, AcceptResponse, Collaborator, DownloadResponse, ErrorBody, InviteRequest,
    NumberRequest, NumberResponse, RegisterRequest, RemoveRequest, RemoveResponse, ShareResponse,
    TokenRequest, TokenResponse, UploadRequest, UploadResponse,
};

use crate::error::NetError;
use crate::naming::Naming;

/// How many times a call is retried after re-resolving the primary.
const RERESOLVE_ATTEMPTS: u32 = 5;

/// Pause between re-resolve attempts.
const RERESOLVE_BACKOFF: Duration = Duration::from_millis(500);

pub struct ApiClient {
    http: reqwest::Client,
    naming: Naming,
    primary: Mutex<Option<String>>,
    token: Mutex<Option<String>>,
}

impl ApiClient {
    pub fn new(naming: Naming) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            naming,
            primary: Mutex::new(None),
            token: Mutex::new(None),
        }
    }

    // ------------------------------------------------------------------
    // RPC surface
    // ------------------------------------------------------------------

    pub async fn register(&self, username: &str, certificate_pem: &str) -> Result<(), NetError> {
        let body = serde_json::to_value(RegisterRequest {
            username: username.to_string(),
            certificate_pem: certificate_pem.to_string(),
        })
        .map_err(|e| NetError::Decode(e.to_string()))?;
        let _: serde_json::Value = self.request(Method::POST, "/register", Some(body)).await?;
        Ok(())
    }

    pub async fn get_number(&self, username: &str) -> Result<String, NetError> {
        let body = serde_json::to_value(NumberRequest {
            username: username.to_string(),
        })
        .map_err(|e| NetError::Decode(e.to_string()))?;
        let resp: NumberResponse = self.request(Method::POST, "/number", Some(body)).await?;
        Ok(resp.nonce)
    }

    /// Exchange a signed challenge for a session token. The token is kept on
    /// the client and attached to every subsequent request.
    pub async fn get_token(
        &self,
        username: &str,
        signed_nonce: Vec<u8>,
    ) -> Result<TokenResponse, NetError> {
        let body = serde_json::to_value(TokenRequest {
            username: username.to_string(),
            signed_nonce,
        })
        .map_err(|e| NetError::Decode(e.to_string()))?;
        let resp: TokenResponse = self.request(Method::POST, "/token", Some(body)).await?;
        *self.token.lock().await = Some(resp.token.clone());
        Ok(resp)
    }

    pub async fn upload(&self, req: &UploadRequest) -> Result<i64, NetError> {
        let body = serde_json::to_value(req).map_err(|e| NetError::Decode(e.to_string()))?;
        let resp: UploadResponse = self.request(Method::POST, "/upload", Some(body)).await?;
        Ok(resp.version)
    }

    pub async fn download(&self, name: &str) -> Result<DownloadResponse, NetError> {
        self.request(Method::GET, &format!("/download/{name}"), None)
            .await
    }

    pub async fn share(&self, username: &str) -> Result<String, NetError> {
        let resp: ShareResponse = self
            .request(Method::GET, &format!("/share/{username}"), None)
            .await?;
        Ok(resp.certificate_pem)
    }

    pub async fn invite(&self, req: &InviteRequest) -> Result<(), NetError> {
        let body = serde_json::to_value(req).map_err(|e| NetError::Decode(e.to_string()))?;
        let _: serde_json::Value = self.request(Method::POST, "/invite", Some(body)).await?;
        Ok(())
    }

    pub async fn accept(&self, file_name: &str) -> Result<Vec<u8>, NetError> {
        let body = serde_json::to_value(AcceptRequest {
            file_name: file_name.to_string(),
        })
        .map_err(|e| NetError::Decode(e.to_string()))?;
        let resp: AcceptResponse = self.request(Method::POST, "/accept", Some(body)).await?;
        Ok(resp.wrapped_key)
    }

    pub async fn remove(&self, req: &RemoveRequest) -> Result<Vec<Collaborator>, NetError> {
        let body = serde_json::to_value(req).map_err(|e| NetError::Decode(e.to_string()))?;
        let resp: RemoveResponse = self.request(Method::POST, "/remove", Some(body)).await?;
        Ok(resp.collaborators)
    }

    pub async fn ping(&self) -> Result<(), NetError> {
        let _: serde_json::Value = self.request(Method::GET, "/ping", None).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transport with re-resolve
    // ------------------------------------------------------------------

    async fn primary_url(&self) -> Result<String, NetError> {
        let mut cached = self.primary.lock().await;
        if let Some(uri) = cached.as_ref() {
            return Ok(uri.clone());
        }
        let uri = self.naming.lookup(PRIMARY_NODE).await?;
        debug!(uri = %uri, "resolved primary");
        *cached = Some(uri.clone());
        Ok(uri)
    }

    async fn invalidate_primary(&self) {
        *self.primary.lock().await = None;
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, NetError> {
        let mut attempt = 0;
        loop {
            let base = self.primary_url().await?;
            match self.send(&base, method.clone(), path, body.as_ref()).await {
                Err(NetError::Unavailable(reason)) if attempt < RERESOLVE_ATTEMPTS => {
                    attempt += 1;
                    warn!(
                        attempt,
                        reason = %reason,
                        "primary unavailable, re-resolving and retrying"
                    );
                    self.invalidate_primary().await;
                    tokio::time::sleep(RERESOLVE_BACKOFF).await;
                }
                other => return other,
            }
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        base: &str,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, NetError> {
        let url = format!("{}{}", base.trim_end_matches('/'), path);

        let mut req = self.http.request(method, &url);
        if let Some(token) = self.token.lock().await.as_ref() {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| NetError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(NetError::Unavailable(format!("{url} answered 503")));
        }
        if !status.is_success() {
            let message = match resp.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            return Err(NetError::Status {
                code: status.as_u16(),
                message,
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| NetError::Decode(e.to_string()))
    }
}
