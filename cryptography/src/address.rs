//! Onion addresses derived from identity keys.

use crate::{base32, Error, DIGEST_LENGTH};
use std::{fmt, str::FromStr};

/// Number of digest bytes rendered into an address.
pub const ADDRESS_DIGEST_LENGTH: usize = 10;

/// Number of characters in an address (80 bits / 5 bits per symbol).
pub const ADDRESS_LENGTH: usize = 16;

/// Suffix used when rendering an address as a hostname.
const ONION_SUFFIX: &str = ".onion";

/// The durable identifier of a peer: 16 lowercase base32 characters.
///
/// An [Address] is a pure function of a public key (see
/// [crate::IdentityKey::network_address]) and is never stored alongside the key it was derived
/// from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// Render the first [ADDRESS_DIGEST_LENGTH] bytes of a public key digest.
    pub fn from_digest(digest: &[u8; DIGEST_LENGTH]) -> Self {
        let encoded = base32::encode(&digest[..ADDRESS_DIGEST_LENGTH]);
        let mut address = [0u8; ADDRESS_LENGTH];
        address.copy_from_slice(encoded.as_bytes());
        Self(address)
    }

    /// Interpret 16 raw bytes (as carried on the wire) as an address.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(bytes).map_err(|_| Error::InvalidAddress)?;
        text.parse()
    }

    /// The address as ASCII bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        // Construction guarantees the bytes are lowercase base32 symbols.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    /// The address with the `.onion` suffix.
    pub fn hostname(&self) -> String {
        format!("{}{}", self.as_str(), ONION_SUFFIX)
    }

    /// The digest prefix this address encodes.
    pub fn digest(&self) -> [u8; ADDRESS_DIGEST_LENGTH] {
        let mut digest = [0u8; ADDRESS_DIGEST_LENGTH];
        if let Ok(decoded) = base32::decode(self.as_str()) {
            digest.copy_from_slice(&decoded);
        }
        digest
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Accepts the bare identifier or a hostname ending in `.onion`, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = match s.len().checked_sub(ONION_SUFFIX.len()) {
            Some(split)
                if s.is_char_boundary(split) && s[split..].eq_ignore_ascii_case(ONION_SUFFIX) =>
            {
                &s[..split]
            }
            _ => s,
        };
        if id.len() != ADDRESS_LENGTH {
            return Err(Error::InvalidAddress);
        }
        base32::decode(id).map_err(|_| Error::InvalidAddress)?;

        let mut address = [0u8; ADDRESS_LENGTH];
        address.copy_from_slice(id.to_ascii_lowercase().as_bytes());
        Ok(Self(address))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.as_str())
    }
}
