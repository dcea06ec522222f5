use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use coffer_shared::CryptoError;
use coffer_store::StoreError;

/// Domain errors raised inside the services and translated exactly once, at
/// the router boundary, into transport status codes.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("This endpoint is for authenticated users only")]
    Unauthenticated,

    #[error("Challenge not found or expired")]
    ChallengeNotFound,

    #[error("Challenge response does not match")]
    ChallengeMismatch,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Username is already in use")]
    DuplicateIdentity,

    #[error("User has already been invited to edit that file")]
    DuplicateInvite,

    #[error("User can already edit the file")]
    AlreadyCollaborator,

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UsernameTaken => ServerError::DuplicateIdentity,
            StoreError::DuplicateInvite => ServerError::DuplicateInvite,
            StoreError::NotFound => ServerError::NotFound("record not found".to_string()),
            other => ServerError::Store(other),
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(e: serde_json::Error) -> Self {
        ServerError::Internal(format!("serialization failed: {e}"))
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthenticated
            | ServerError::ChallengeNotFound
            | ServerError::ChallengeMismatch => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::DuplicateIdentity
            | ServerError::DuplicateInvite
            | ServerError::AlreadyCollaborator => (StatusCode::CONFLICT, self.to_string()),
            ServerError::Crypto(_) | ServerError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ServerError::Store(_) | ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
