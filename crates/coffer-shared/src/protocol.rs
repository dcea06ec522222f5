use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub certificate_pem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberResponse {
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    /// RSA-SHA256 signature over the challenge nonce's UTF-8 bytes.
    pub signed_nonce: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    /// File names of the caller's outstanding, unaccepted invites.
    pub pending_invites: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub name: String,
    pub ciphertext: Vec<u8>,
    /// Signature over `ciphertext` by the uploader.
    pub signature: Vec<u8>,
    /// Username of the file's owner; equals the caller on a first write.
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub ciphertext: Vec<u8>,
    pub signature: Vec<u8>,
    /// Certificate of the last modifier; the client verifies `signature`
    /// against it, the server never does.
    pub modifier_certificate_pem: String,
    pub last_modifier: String,
    pub version: i64,
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareResponse {
    pub certificate_pem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteRequest {
    pub username: String,
    pub file_name: String,
    /// The file key wrapped under the invitee's certificate.
    pub wrapped_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptRequest {
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptResponse {
    pub wrapped_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub username: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collaborator {
    pub username: String,
    pub certificate_pem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveResponse {
    /// Collaborators still on the file (owner and removed user excluded),
    /// with certificates so the owner can re-key and re-invite them.
    pub collaborators: Vec<Collaborator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
