//! # coffer-shared
//!
//! Types shared between the coffer client and server:
//! - the crypto engine (AES-128-CBC file encryption, RSA signatures and
//!   key wrapping, deterministic IV derivation)
//! - long-term key material (RSA keypairs and public-key certificates)
//! - stateless signed session tokens
//! - the wire protocol request/response types

pub mod constants;
pub mod crypto;
pub mod keys;
pub mod protocol;
pub mod token;

mod error;

pub use error::{CryptoError, KeyError, TokenError};
