use std::path::Path;

use rand::rngs::OsRng;
use rsa::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::constants::RSA_KEY_BITS;
use crate::error::KeyError;

/// An identity's RSA private key.
#[derive(Clone)]
pub struct Keypair {
    private: RsaPrivateKey,
}

/// An identity's public-key credential.
#[derive(Debug, Clone, PartialEq)]
pub struct Certificate {
    public: RsaPublicKey,
}

impl Keypair {
    /// Generate a fresh RSA keypair. Slow by nature; call once per identity.
    pub fn generate() -> Result<Self, KeyError> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| KeyError::Generation(e.to_string()))?;
        Ok(Self { private })
    }

    /// Parse a PKCS#8 PEM private key.
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem).map_err(|_| KeyError::InvalidPem)?;
        Ok(Self { private })
    }

    /// Serialize to PKCS#8 PEM.
    pub fn to_pem(&self) -> Result<String, KeyError> {
        self.private
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|_| KeyError::InvalidPem)
    }

    /// Load a private key from a PEM file.
    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    /// Write the private key to a PEM file.
    pub fn save(&self, path: &Path) -> Result<(), KeyError> {
        std::fs::write(path, self.to_pem()?)?;
        Ok(())
    }

    /// The public-key credential for this keypair.
    pub fn certificate(&self) -> Certificate {
        Certificate {
            public: RsaPublicKey::from(&self.private),
        }
    }

    pub(crate) fn rsa(&self) -> &RsaPrivateKey {
        &self.private
    }
}

impl Certificate {
    /// Parse an SPKI PEM public key.
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        let public = RsaPublicKey::from_public_key_pem(pem).map_err(|_| KeyError::InvalidPem)?;
        Ok(Self { public })
    }

    /// Serialize to SPKI PEM.
    pub fn to_pem(&self) -> Result<String, KeyError> {
        self.public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|_| KeyError::InvalidPem)
    }

    /// Load a certificate from a PEM file.
    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    /// Write the certificate to a PEM file.
    pub fn save(&self, path: &Path) -> Result<(), KeyError> {
        std::fs::write(path, self.to_pem()?)?;
        Ok(())
    }

    pub(crate) fn rsa(&self) -> &RsaPublicKey {
        &self.public
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_pem_roundtrip() {
        let keypair = Keypair::generate().unwrap();
        let pem = keypair.to_pem().unwrap();
        let restored = Keypair::from_pem(&pem).unwrap();
        assert_eq!(keypair.certificate(), restored.certificate());
    }

    #[test]
    fn test_certificate_pem_roundtrip() {
        let keypair = Keypair::generate().unwrap();
        let cert = keypair.certificate();
        let pem = cert.to_pem().unwrap();
        let restored = Certificate::from_pem(&pem).unwrap();
        assert_eq!(cert, restored);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("key.pem");
        let cert_path = dir.path().join("cert.pem");

        let keypair = Keypair::generate().unwrap();
        keypair.save(&key_path).unwrap();
        keypair.certificate().save(&cert_path).unwrap();

        let loaded_key = Keypair::load(&key_path).unwrap();
        let loaded_cert = Certificate::load(&cert_path).unwrap();
        assert_eq!(loaded_key.certificate(), loaded_cert);
    }

    #[test]
    fn test_invalid_pem_rejected() {
        assert!(Keypair::from_pem("not a key").is_err());
        assert!(Certificate::from_pem("not a cert").is_err());
    }
}
