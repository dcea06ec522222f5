use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::TokenError;
use crate::keys::{Certificate, Keypair};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub identity_id: i64,
    pub issued_at: DateTime<Utc>,
}

/// A stateless session credential: bincode-encoded claims plus an RSA-SHA256
/// signature from the server's token key, base64url-encoded for transport.
/// The server keeps no session table; a valid signature *is* the session.
/// Both replicas hold the same token key so either honors the other's tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub claims: TokenClaims,
    pub signature: Vec<u8>,
}

impl SessionToken {
    /// Mint a token for an identity, signed with the server token key.
    pub fn issue(signer: &Keypair, identity_id: i64) -> Result<String, TokenError> {
        let claims = TokenClaims {
            identity_id,
            issued_at: Utc::now(),
        };
        let payload = bincode::serialize(&claims).map_err(|_| TokenError::Encoding)?;
        let signature = crypto::sign(&payload, signer);

        let token = Self { claims, signature };
        let bytes = bincode::serialize(&token).map_err(|_| TokenError::Encoding)?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Check a token's signature and return the identity id it carries.
    pub fn verify(encoded: &str, issuer: &Certificate) -> Result<i64, TokenError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| TokenError::Malformed)?;
        let token: Self = bincode::deserialize(&bytes).map_err(|_| TokenError::Malformed)?;

        let payload = bincode::serialize(&token.claims).map_err(|_| TokenError::Encoding)?;
        if !crypto::verify(&payload, issuer, &token.signature) {
            return Err(TokenError::BadSignature);
        }
        Ok(token.claims.identity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_verify_roundtrip() {
        let server_key = Keypair::generate().unwrap();
        let token = SessionToken::issue(&server_key, 42).unwrap();

        let id = SessionToken::verify(&token, &server_key.certificate()).unwrap();
        assert_eq!(id, 42);
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let server_key = Keypair::generate().unwrap();
        let other_key = Keypair::generate().unwrap();

        let token = SessionToken::issue(&server_key, 7).unwrap();
        assert!(SessionToken::verify(&token, &other_key.certificate()).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let server_key = Keypair::generate().unwrap();
        assert!(SessionToken::verify("not-a-token", &server_key.certificate()).is_err());
        assert!(SessionToken::verify("", &server_key.certificate()).is_err());
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let server_key = Keypair::generate().unwrap();
        let encoded = SessionToken::issue(&server_key, 1).unwrap();

        let bytes = URL_SAFE_NO_PAD.decode(&encoded).unwrap();
        let mut token: SessionToken = bincode::deserialize(&bytes).unwrap();
        token.claims.identity_id = 999;
        let forged = URL_SAFE_NO_PAD.encode(bincode::serialize(&token).unwrap());

        assert!(SessionToken::verify(&forged, &server_key.certificate()).is_err());
    }
}
