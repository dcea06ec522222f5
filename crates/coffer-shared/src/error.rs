use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Key wrapping failed: symmetric key does not fit the recipient envelope")]
    WrapFailed,

    #[error("Key unwrapping failed: wrong recipient key or corrupted envelope")]
    UnwrapFailed,

    #[error("Cannot derive an IV from an empty username")]
    EmptyIvSource,
}

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Failed to generate keypair: {0}")]
    Generation(String),

    #[error("Invalid PEM key material")]
    InvalidPem,

    #[error("Key file error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Malformed session token")]
    Malformed,

    #[error("Session token signature is invalid")]
    BadSignature,

    #[error("Failed to encode session token")]
    Encoding,
}
