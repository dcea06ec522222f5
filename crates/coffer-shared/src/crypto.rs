use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::Pkcs1v15Encrypt;

use crate::constants::{FILE_KEY_SIZE, IV_SIZE};
use crate::error::CryptoError;
use crate::keys::{Certificate, Keypair};

pub type FileKey = [u8; FILE_KEY_SIZE];

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Generate a random AES-128 file key.
pub fn generate_file_key() -> FileKey {
    let mut key = [0u8; FILE_KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encrypt plaintext with AES-128-CBC / PKCS#7.
pub fn encrypt(key: &FileKey, iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt AES-128-CBC / PKCS#7 ciphertext.
///
/// A padding or length failure means corruption or a wrong key; callers must
/// not treat it as a signature failure, the two signal different attacks.
pub fn decrypt(key: &FileKey, iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Sign bytes with RSA PKCS#1 v1.5 / SHA-256.
pub fn sign(data: &[u8], keypair: &Keypair) -> Vec<u8> {
    let signing_key = SigningKey::<Sha256>::new(keypair.rsa().clone());
    signing_key.sign(data).to_vec()
}

/// Verify an RSA PKCS#1 v1.5 / SHA-256 signature against a certificate.
pub fn verify(data: &[u8], certificate: &Certificate, signature: &[u8]) -> bool {
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    let verifying_key = VerifyingKey::<Sha256>::new(certificate.rsa().clone());
    verifying_key.verify(data, &signature).is_ok()
}

/// Wrap a file key for a recipient under their public-key credential.
pub fn wrap_key(key: &FileKey, recipient: &Certificate) -> Result<Vec<u8>, CryptoError> {
    recipient
        .rsa()
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, key)
        .map_err(|_| CryptoError::WrapFailed)
}

/// Unwrap a file key with the recipient's private key.
pub fn unwrap_key(wrapped: &[u8], keypair: &Keypair) -> Result<FileKey, CryptoError> {
    let bytes = keypair
        .rsa()
        .decrypt(Pkcs1v15Encrypt, wrapped)
        .map_err(|_| CryptoError::UnwrapFailed)?;
    if bytes.len() != FILE_KEY_SIZE {
        return Err(CryptoError::UnwrapFailed);
    }
    let mut key = [0u8; FILE_KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Derive the CBC IV from the username of whoever produced the ciphertext:
/// the username's bytes repeated cyclically to 16 bytes.
///
/// Decryption must use the IV of the file's *last modifier*, not the reader.
/// The construction is deterministic and low-entropy; it is kept bit-for-bit
/// for compatibility with existing stored ciphertexts.
pub fn derive_iv(username: &str) -> Result<[u8; IV_SIZE], CryptoError> {
    let bytes = username.as_bytes();
    if bytes.is_empty() {
        return Err(CryptoError::EmptyIvSource);
    }
    let mut iv = [0u8; IV_SIZE];
    for (i, out) in iv.iter_mut().enumerate() {
        *out = bytes[i % bytes.len()];
    }
    Ok(iv)
}
