//! RSA identity keys.
//!
//! An [IdentityKey] holds either a full keypair (the local identity) or only the public half (a
//! contact). Signatures use PKCS#1 v1.5 type 1 padding applied directly to the message (no
//! DigestInfo prefix), so a signature over a 16-byte challenge is reproducible by any
//! implementation of `RSA_private_encrypt`.
//!
//! # Example
//! ```rust
//! use onionlink_cryptography::IdentityKey;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! // Generate a new identity
//! let mut rng = StdRng::seed_from_u64(0);
//! let key = IdentityKey::generate(&mut rng, 1024).unwrap();
//!
//! // Derive its address
//! let address = key.network_address().unwrap();
//! assert_eq!(address.as_str().len(), 16);
//!
//! // Sign and verify a challenge
//! let signature = key.sign(b"challenge").unwrap();
//! assert!(key.public().verify(b"challenge", &signature));
//! ```

use crate::{Address, Error, DIGEST_LENGTH};
use rand::{CryptoRng, RngCore};
use rsa::{
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey, LineEnding},
    traits::PublicKeyParts,
    Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
};
use sha1::{Digest as _, Sha1};
use std::{fmt, path::Path, sync::OnceLock};
use zeroize::Zeroizing;

/// Bytes of PKCS#1 v1.5 padding overhead in a signature block.
const PADDING_OVERHEAD: usize = 11;

/// An RSA identity, optionally carrying private material.
#[derive(Clone)]
pub struct IdentityKey {
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,

    /// SHA-1 over the PKCS#1 DER encoding of `public`, computed on first use.
    digest: OnceLock<[u8; DIGEST_LENGTH]>,
}

impl IdentityKey {
    fn from_private(private: RsaPrivateKey) -> Self {
        Self {
            public: private.to_public_key(),
            private: Some(private),
            digest: OnceLock::new(),
        }
    }

    fn from_public(public: RsaPublicKey) -> Self {
        Self {
            public,
            private: None,
            digest: OnceLock::new(),
        }
    }

    /// Generate a fresh private identity with a modulus of `bits` bits.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R, bits: usize) -> Result<Self, Error> {
        let private = RsaPrivateKey::new(rng, bits).map_err(|_| Error::KeyGenerationFailed)?;
        Ok(Self::from_private(private))
    }

    /// Parse a PEM encoded key.
    ///
    /// When `private` is set the data must hold a private key (PKCS#1 `RSA PRIVATE KEY`, or
    /// PKCS#8 `PRIVATE KEY`). Otherwise it must hold a public key (PKCS#1 `RSA PUBLIC KEY`, or
    /// SPKI `PUBLIC KEY`).
    pub fn load(data: &[u8], private: bool) -> Result<Self, Error> {
        let pem = std::str::from_utf8(data).map_err(|_| Error::KeyParseFailed)?;
        if private {
            RsaPrivateKey::from_pkcs1_pem(pem)
                .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
                .map(Self::from_private)
                .map_err(|_| Error::KeyParseFailed)
        } else {
            RsaPublicKey::from_pkcs1_pem(pem)
                .or_else(|_| RsaPublicKey::from_public_key_pem(pem))
                .map(Self::from_public)
                .map_err(|_| Error::KeyParseFailed)
        }
    }

    /// Read and parse a PEM encoded key from `path`.
    pub fn load_file(path: impl AsRef<Path>, private: bool) -> Result<Self, Error> {
        let data = Zeroizing::new(std::fs::read(path)?);
        Self::load(&data, private)
    }

    /// Returns `true` if the key can sign.
    pub fn is_private(&self) -> bool {
        self.private.is_some()
    }

    /// A copy of this key without private material.
    pub fn public(&self) -> Self {
        Self {
            public: self.public.clone(),
            private: None,
            digest: self.digest.clone(),
        }
    }

    /// Size of the modulus (and of every signature) in bytes.
    pub fn size(&self) -> usize {
        self.public.size()
    }

    /// SHA-1 digest of the PKCS#1 DER encoding of the public key.
    pub fn public_digest(&self) -> Result<[u8; DIGEST_LENGTH], Error> {
        if let Some(digest) = self.digest.get() {
            return Ok(*digest);
        }
        let der = self
            .public
            .to_pkcs1_der()
            .map_err(|_| Error::EncodeFailed)?;
        let mut digest = [0u8; DIGEST_LENGTH];
        digest.copy_from_slice(&Sha1::digest(der.as_bytes()));
        Ok(*self.digest.get_or_init(|| digest))
    }

    /// The onion address of this key.
    pub fn network_address(&self) -> Result<Address, Error> {
        Ok(Address::from_digest(&self.public_digest()?))
    }

    /// PEM (PKCS#1) encoding of the public key, as carried in contact requests.
    pub fn encoded_public_key(&self) -> Result<String, Error> {
        self.public
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|_| Error::EncodeFailed)
    }

    /// PEM (PKCS#1) encoding of the private key.
    pub fn encoded_private_key(&self) -> Result<Zeroizing<String>, Error> {
        let private = self.private.as_ref().ok_or(Error::NoPrivateKey)?;
        private
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|_| Error::EncodeFailed)
    }

    /// Sign `data` with the private key.
    ///
    /// `data` must be at least 11 bytes shorter than the modulus.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let private = self.private.as_ref().ok_or(Error::NoPrivateKey)?;
        if data.len() + PADDING_OVERHEAD > private.size() {
            return Err(Error::SignFailed);
        }
        private
            .sign(Pkcs1v15Sign::new_unprefixed(), data)
            .map_err(|_| Error::SignFailed)
    }

    /// Returns `true` if `signature` recovers exactly `data` under the public key.
    ///
    /// Malformed signatures, padding errors and size mismatches all yield `false`.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        self.public
            .verify(Pkcs1v15Sign::new_unprefixed(), data, signature)
            .is_ok()
    }
}

impl PartialEq for IdentityKey {
    /// Keys are equal when their public halves are.
    fn eq(&self, other: &Self) -> bool {
        self.public == other.public
    }
}

impl Eq for IdentityKey {}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = self
            .network_address()
            .map(|address| address.to_string())
            .unwrap_or_default();
        f.debug_struct("IdentityKey")
            .field("address", &address)
            .field("private", &self.is_private())
            .finish()
    }
}
