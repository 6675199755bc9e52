//! Password hashing for the anonymizing network's control port.
//!
//! Produces values for `HashedControlPassword`: an iterated and salted SHA-1 (OpenPGP S2K with a
//! fixed count indicator of 96, i.e. 65536 hashed bytes).

use rand::{CryptoRng, RngCore};
use sha1::{Digest as _, Sha1};
use zeroize::Zeroizing;

/// Length of the random salt.
const SALT_LENGTH: usize = 8;

/// Encoded iteration count.
const COUNT_INDICATOR: u8 = 96;

/// Number of bytes fed to the hash for [COUNT_INDICATOR].
const fn count(indicator: u8) -> usize {
    (16 + (indicator as usize & 15)) << ((indicator as usize >> 4) + 6)
}

/// Hash `password` with a fresh random salt.
pub fn hashed_password<R: RngCore + CryptoRng>(rng: &mut R, password: &[u8]) -> String {
    let mut salt = [0u8; SALT_LENGTH];
    rng.fill_bytes(&mut salt);
    hash_with_salt(&salt, password)
}

fn hash_with_salt(salt: &[u8; SALT_LENGTH], password: &[u8]) -> String {
    let mut material = Zeroizing::new(Vec::with_capacity(SALT_LENGTH + password.len()));
    material.extend_from_slice(salt);
    material.extend_from_slice(password);

    let mut hasher = Sha1::new();
    let mut remaining = count(COUNT_INDICATOR);
    while remaining > 0 {
        let n = remaining.min(material.len());
        hasher.update(&material[..n]);
        remaining -= n;
    }

    format!(
        "16:{}{:02X}{}",
        hex::encode_upper(salt),
        COUNT_INDICATOR,
        hex::encode_upper(hasher.finalize())
    )
}
