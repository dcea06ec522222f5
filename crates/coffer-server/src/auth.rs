//! Challenge–response authentication and session issuance.
//!
//! `issue_challenge` hands out a short-lived random nonce, overwriting any
//! pending one (only the newest is answerable, which closes the replay
//! window); `verify_challenge` checks the caller's signature over it against
//! the registration certificate, consumes the nonce and mints a session token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::{debug, info};

use coffer_shared::constants::{CHALLENGE_TTL_SECS, UNAUTHENTICATED};
use coffer_shared::crypto;
use coffer_shared::keys::{Certificate, Keypair};
use coffer_shared::token::SessionToken;
use coffer_store::{Database, UserRecord};

use crate::error::ServerError;

// ---------------------------------------------------------------------------
// Challenge cache
// ---------------------------------------------------------------------------

struct Challenge {
    nonce: String,
    expires_at: Instant,
}

/// Ephemeral identity-id -> nonce map with a short TTL.
pub struct ChallengeCache {
    entries: Mutex<HashMap<i64, Challenge>>,
    ttl: Duration,
}

impl ChallengeCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(CHALLENGE_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Store a nonce for an identity, replacing any pending one.
    async fn put(&self, identity_id: i64, nonce: String) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            identity_id,
            Challenge {
                nonce,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Read an identity's pending nonce without consuming it. Expired
    /// entries are dropped on access.
    async fn peek(&self, identity_id: i64) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(&identity_id) {
            Some(challenge) if challenge.expires_at > Instant::now() => {
                Some(challenge.nonce.clone())
            }
            Some(_) => {
                entries.remove(&identity_id);
                None
            }
            None => None,
        }
    }

    /// Consume an identity's pending nonce after successful verification.
    async fn consume(&self, identity_id: i64) {
        self.entries.lock().await.remove(&identity_id);
    }

    /// Drop all expired entries. Run periodically from a background task.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .retain(|_, challenge| challenge.expires_at > now);
    }
}

impl Default for ChallengeCache {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Auth service
// ---------------------------------------------------------------------------

pub struct AuthService {
    db: Arc<Mutex<Database>>,
    challenges: ChallengeCache,
    token_key: Keypair,
    token_cert: Certificate,
}

impl AuthService {
    pub fn new(db: Arc<Mutex<Database>>, token_key: Keypair) -> Self {
        let token_cert = token_key.certificate();
        Self {
            db,
            challenges: ChallengeCache::new(),
            token_key,
            token_cert,
        }
    }

    #[cfg(test)]
    fn with_challenge_ttl(db: Arc<Mutex<Database>>, token_key: Keypair, ttl: Duration) -> Self {
        let token_cert = token_key.certificate();
        Self {
            db,
            challenges: ChallengeCache::with_ttl(ttl),
            token_key,
            token_cert,
        }
    }

    pub fn challenges(&self) -> &ChallengeCache {
        &self.challenges
    }

    /// Register a new identity with its public-key credential.
    pub async fn register(
        &self,
        username: &str,
        certificate_pem: &str,
    ) -> Result<UserRecord, ServerError> {
        if username.is_empty() {
            return Err(ServerError::BadRequest("Username must not be empty".into()));
        }
        Certificate::from_pem(certificate_pem)
            .map_err(|_| ServerError::BadRequest("Certificate is not valid SPKI PEM".into()))?;

        let user = self
            .db
            .lock()
            .await
            .create_user(username, certificate_pem)?;
        info!(username = %username, id = user.id, "registered identity");
        Ok(user)
    }

    /// Issue a fresh login challenge, overwriting any pending one.
    pub async fn issue_challenge(&self, username: &str) -> Result<String, ServerError> {
        let user = self
            .db
            .lock()
            .await
            .user_by_username(username)
            .map_err(|_| ServerError::NotFound(format!("Unknown user '{username}'")))?;

        let nonce = OsRng.next_u32().to_string();
        self.challenges.put(user.id, nonce.clone()).await;
        debug!(username = %username, "issued login challenge");
        Ok(nonce)
    }

    /// Verify a signed challenge and mint a session token. Also returns the
    /// identity's pending invite file names as a login-time convenience.
    pub async fn verify_challenge(
        &self,
        username: &str,
        signed_nonce: &[u8],
    ) -> Result<(String, Vec<String>), ServerError> {
        let (user, pending_invites) = {
            let db = self.db.lock().await;
            let user = db
                .user_by_username(username)
                .map_err(|_| ServerError::NotFound(format!("Unknown user '{username}'")))?;
            let pending = db.pending_invites_for_user(user.id)?;
            (user, pending)
        };

        let nonce = self
            .challenges
            .peek(user.id)
            .await
            .ok_or(ServerError::ChallengeNotFound)?;

        let certificate = Certificate::from_pem(&user.certificate_pem)
            .map_err(|_| ServerError::Internal("Stored certificate is invalid".into()))?;

        if !crypto::verify(nonce.as_bytes(), &certificate, signed_nonce) {
            return Err(ServerError::ChallengeMismatch);
        }

        // Single use: the nonce is gone only once verification succeeded.
        self.challenges.consume(user.id).await;

        let token = SessionToken::issue(&self.token_key, user.id)
            .map_err(|e| ServerError::Internal(format!("Token issuance failed: {e}")))?;

        info!(username = %username, id = user.id, "login succeeded");
        Ok((token, pending_invites))
    }

    /// Resolve a bearer token to a principal id. Missing or invalid tokens
    /// map to the unauthenticated sentinel rather than an error; protected
    /// handlers reject the sentinel explicitly.
    pub fn authenticate(&self, bearer: Option<&str>) -> i64 {
        match bearer {
            Some(token) => {
                SessionToken::verify(token, &self.token_cert).unwrap_or(UNAUTHENTICATED)
            }
            None => UNAUTHENTICATED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> (AuthService, Keypair) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let token_key = Keypair::generate().unwrap();
        let service = AuthService::new(db, token_key);
        let user_key = Keypair::generate().unwrap();
        service
            .register("alice", &user_key.certificate().to_pem().unwrap())
            .await
            .unwrap();
        (service, user_key)
    }

    #[tokio::test]
    async fn test_full_login_flow() {
        let (service, user_key) = service().await;

        let nonce = service.issue_challenge("alice").await.unwrap();
        let signed = crypto::sign(nonce.as_bytes(), &user_key);

        let (token, pending) = service.verify_challenge("alice", &signed).await.unwrap();
        assert!(pending.is_empty());

        let id = service.authenticate(Some(&token));
        assert_ne!(id, UNAUTHENTICATED);
    }

    #[tokio::test]
    async fn test_challenge_is_single_use() {
        let (service, user_key) = service().await;

        let nonce = service.issue_challenge("alice").await.unwrap();
        let signed = crypto::sign(nonce.as_bytes(), &user_key);

        service.verify_challenge("alice", &signed).await.unwrap();

        // Replaying the same signed nonce finds no pending challenge.
        let err = service.verify_challenge("alice", &signed).await.unwrap_err();
        assert!(matches!(err, ServerError::ChallengeNotFound));
    }

    #[tokio::test]
    async fn test_reissue_overwrites_previous_challenge() {
        let (service, user_key) = service().await;

        let first = service.issue_challenge("alice").await.unwrap();
        let _second = service.issue_challenge("alice").await.unwrap();

        // Answering the stale challenge must fail: only the newest is valid.
        let signed_stale = crypto::sign(first.as_bytes(), &user_key);
        let err = service
            .verify_challenge("alice", &signed_stale)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::ChallengeMismatch));
    }

    #[tokio::test]
    async fn test_wrong_key_is_mismatch_and_preserves_challenge() {
        let (service, user_key) = service().await;

        let nonce = service.issue_challenge("alice").await.unwrap();
        let intruder = Keypair::generate().unwrap();
        let forged = crypto::sign(nonce.as_bytes(), &intruder);

        let err = service.verify_challenge("alice", &forged).await.unwrap_err();
        assert!(matches!(err, ServerError::ChallengeMismatch));

        // A failed attempt must not consume the challenge.
        let signed = crypto::sign(nonce.as_bytes(), &user_key);
        assert!(service.verify_challenge("alice", &signed).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_challenge_not_found() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let token_key = Keypair::generate().unwrap();
        let service =
            AuthService::with_challenge_ttl(db, token_key, Duration::from_millis(10));
        let user_key = Keypair::generate().unwrap();
        service
            .register("alice", &user_key.certificate().to_pem().unwrap())
            .await
            .unwrap();

        let nonce = service.issue_challenge("alice").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let signed = crypto::sign(nonce.as_bytes(), &user_key);
        let err = service.verify_challenge("alice", &signed).await.unwrap_err();
        assert!(matches!(err, ServerError::ChallengeNotFound));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let (service, user_key) = service().await;
        let err = service
            .register("alice", &user_key.certificate().to_pem().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::DuplicateIdentity));
    }

    #[tokio::test]
    async fn test_invalid_tokens_map_to_sentinel() {
        let (service, _) = service().await;
        assert_eq!(service.authenticate(None), UNAUTHENTICATED);
        assert_eq!(service.authenticate(Some("garbage")), UNAUTHENTICATED);
    }
}
