//! Load identity keys, derive onion addresses, and sign or verify challenges.
//!
//! Every peer is known by an [Address]: the base32 rendering of the first 10 bytes of the SHA-1
//! digest of its RSA public key. Owning the matching private key is proven by signing a random
//! challenge with [IdentityKey::sign].
//!
//! # Status
//!
//! `onionlink-cryptography` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

use thiserror::Error;

mod address;
pub use address::{Address, ADDRESS_DIGEST_LENGTH, ADDRESS_LENGTH};
pub mod base32;
pub mod control;
mod identity;
pub use identity::IdentityKey;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

/// Length of a public key digest (SHA-1).
pub const DIGEST_LENGTH: usize = 20;

/// Errors that can occur when working with identities.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to parse key")]
    KeyParseFailed,
    #[error("failed to generate key")]
    KeyGenerationFailed,
    #[error("failed to encode key")]
    EncodeFailed,
    #[error("no private key")]
    NoPrivateKey,
    #[error("failed to sign")]
    SignFailed,
    #[error("invalid base32 symbol: {0:?}")]
    InvalidSymbol(char),
    #[error("invalid base32 length: {0} symbols")]
    InvalidLength(usize),
    #[error("invalid address")]
    InvalidAddress,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
