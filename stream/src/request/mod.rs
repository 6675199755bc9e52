//! Contact requests: proving ownership of an address before a relationship exists.
//!
//! The listener sends a random 16-byte challenge as soon as a connection is accepted. The
//! connecting party answers with a single request frame:
//!
//! ```txt
//! [u16 length][16 hostname][16 secret][u16 n][n public key][u16 n][n signature][u16 n][n nickname][u16 n][n message]
//! ```
//!
//! `length` counts the whole frame, its own two bytes included. The public key is PEM encoded,
//! the signature covers the challenge, and the nickname and message are UTF-8. The listener
//! replies with single [Response] bytes.

use crate::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use onionlink_cryptography::{Address, IdentityKey, ADDRESS_LENGTH};

mod client;
pub use client::{Client, Outcome};
mod server;
pub use server::{Arbiter, Decision, Progress, Promotion, Server, Session, State, Verdict};

/// Length of the challenge sent by the listener.
pub const CHALLENGE_LENGTH: usize = 16;

/// Length of the connection secret carried in a request.
pub const SECRET_LENGTH: usize = 16;

/// Size of the length prefix of a request.
const LENGTH_PREFIX: usize = 2;

/// Smallest possible request: prefix, hostname, secret and four empty variable fields.
pub const MIN_REQUEST_SIZE: usize = LENGTH_PREFIX + ADDRESS_LENGTH + SECRET_LENGTH + 4 * 2;

/// Configuration for contact request handling.
#[derive(Clone, Debug)]
pub struct Config {
    /// Largest request frame accepted by a listener (the length prefix caps this at 65535).
    pub max_request_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_request_size: u16::MAX as usize,
        }
    }
}

/// Single-byte replies sent by the listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Response {
    /// Request received and valid; a decision follows later.
    Acknowledge = 0x00,
    /// Request accepted; the connection becomes the primary connection.
    Accept = 0x01,
    /// Request declined.
    Rejected = 0x40,
    /// Request could not be parsed.
    Malformed = 0x80,
    /// Key, address or signature did not check out.
    CryptoFailure = 0x81,
    /// Neither a nickname nor a message was provided.
    EmptyRequest = 0x82,
}

impl Response {
    /// Returns `true` if the transport is closed after this response.
    pub fn closes(&self) -> bool {
        !matches!(self, Self::Acknowledge | Self::Accept)
    }
}

impl From<Response> for u8 {
    fn from(response: Response) -> Self {
        response as u8
    }
}

impl TryFrom<u8> for Response {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Acknowledge),
            0x01 => Ok(Self::Accept),
            0x40 => Ok(Self::Rejected),
            0x80 => Ok(Self::Malformed),
            0x81 => Ok(Self::CryptoFailure),
            0x82 => Ok(Self::EmptyRequest),
            other => Err(Error::UnknownResponse(other)),
        }
    }
}

/// Reasons a request fails validation, in the order they are checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    Malformed,
    UnparsableKey,
    HostnameMismatch,
    InvalidSignature,
    Empty,
}

impl Rejection {
    /// The response sent for this rejection.
    pub fn response(&self) -> Response {
        match self {
            Self::Malformed => Response::Malformed,
            Self::UnparsableKey | Self::HostnameMismatch | Self::InvalidSignature => {
                Response::CryptoFailure
            }
            Self::Empty => Response::EmptyRequest,
        }
    }
}

/// A request as carried on the wire, not yet validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub hostname: [u8; ADDRESS_LENGTH],
    pub secret: [u8; SECRET_LENGTH],
    pub public_key: Bytes,
    pub signature: Bytes,
    pub nickname: String,
    pub message: String,
}

/// A request whose sender proved ownership of `address`.
#[derive(Clone, Debug)]
pub struct Verified {
    pub address: Address,
    pub secret: [u8; SECRET_LENGTH],
    pub key: IdentityKey,
    pub nickname: String,
    pub message: String,
}

fn put_variable(buf: &mut BytesMut, field: &[u8]) -> Result<(), Error> {
    let len: u16 = field
        .len()
        .try_into()
        .map_err(|_| Error::FieldTooLarge(field.len()))?;
    buf.put_u16(len);
    buf.put_slice(field);
    Ok(())
}

fn get_fixed<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], Error> {
    if buf.remaining() < N {
        return Err(Error::Malformed("truncated fixed field"));
    }
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

fn get_variable(buf: &mut &[u8]) -> Result<Bytes, Error> {
    if buf.remaining() < LENGTH_PREFIX {
        return Err(Error::Malformed("truncated field length"));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(Error::Malformed("truncated field"));
    }
    Ok(buf.copy_to_bytes(len))
}

fn get_string(buf: &mut &[u8]) -> Result<String, Error> {
    let bytes = get_variable(buf)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::Malformed("string is not utf-8"))
}

impl Request {
    /// Build a request answering `challenge` with `identity`.
    pub fn sign(
        identity: &IdentityKey,
        challenge: &[u8],
        secret: [u8; SECRET_LENGTH],
        nickname: &str,
        message: &str,
    ) -> Result<Self, Error> {
        let address = identity.network_address()?;
        Ok(Self {
            hostname: *address.as_bytes(),
            secret,
            public_key: Bytes::from(identity.encoded_public_key()?),
            signature: Bytes::from(identity.sign(challenge)?),
            nickname: nickname.to_string(),
            message: message.to_string(),
        })
    }

    /// Encode the request, length prefix included.
    pub fn encode(&self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::with_capacity(MIN_REQUEST_SIZE);
        buf.put_u16(0);
        buf.put_slice(&self.hostname);
        buf.put_slice(&self.secret);
        put_variable(&mut buf, &self.public_key)?;
        put_variable(&mut buf, &self.signature)?;
        put_variable(&mut buf, self.nickname.as_bytes())?;
        put_variable(&mut buf, self.message.as_bytes())?;

        // Backfill the total length
        let len: u16 = buf
            .len()
            .try_into()
            .map_err(|_| Error::RequestTooLarge(buf.len()))?;
        buf[..LENGTH_PREFIX].copy_from_slice(&len.to_be_bytes());
        Ok(buf.freeze())
    }

    /// Decode a complete request frame, length prefix included.
    pub fn decode(frame: &[u8]) -> Result<Self, Error> {
        let mut buf = frame;
        if buf.remaining() < LENGTH_PREFIX {
            return Err(Error::Malformed("missing length"));
        }
        let len = buf.get_u16() as usize;
        if len != frame.len() {
            return Err(Error::Malformed("length does not match frame"));
        }

        let request = Self {
            hostname: get_fixed(&mut buf)?,
            secret: get_fixed(&mut buf)?,
            public_key: get_variable(&mut buf)?,
            signature: get_variable(&mut buf)?,
            nickname: get_string(&mut buf)?,
            message: get_string(&mut buf)?,
        };
        if buf.has_remaining() {
            return Err(Error::Malformed("trailing data"));
        }
        Ok(request)
    }

    /// Check that the sender owns the claimed address and answered `challenge`.
    pub fn verify(self, challenge: &[u8]) -> Result<Verified, Rejection> {
        // Parse the public key
        let key = IdentityKey::load(&self.public_key, false).map_err(|_| Rejection::UnparsableKey)?;

        // Verify that the key belongs to the claimed address
        let address = key
            .network_address()
            .map_err(|_| Rejection::UnparsableKey)?;
        if address.as_bytes() != &self.hostname {
            return Err(Rejection::HostnameMismatch);
        }

        // Verify that the challenge was signed by the key
        if !key.verify(challenge, &self.signature) {
            return Err(Rejection::InvalidSignature);
        }

        // Either a nickname or a message is required
        if self.nickname.is_empty() && self.message.is_empty() {
            return Err(Rejection::Empty);
        }

        Ok(Verified {
            address,
            secret: self.secret,
            key,
            nickname: self.nickname,
            message: self.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onionlink_cryptography::fixtures;

    const CHALLENGE: [u8; CHALLENGE_LENGTH] = [9; CHALLENGE_LENGTH];

    fn alice() -> IdentityKey {
        IdentityKey::load(fixtures::ALICE.as_bytes(), true).unwrap()
    }

    fn bob() -> IdentityKey {
        IdentityKey::load(fixtures::BOB.as_bytes(), true).unwrap()
    }

    fn signed(nickname: &str, message: &str) -> Request {
        Request::sign(&alice(), &CHALLENGE, [3; SECRET_LENGTH], nickname, message).unwrap()
    }

    #[test]
    fn test_encode_decode() {
        let request = signed("alice", "hi bob");
        let encoded = request.encode().unwrap();
        assert_eq!(
            u16::from_be_bytes([encoded[0], encoded[1]]) as usize,
            encoded.len()
        );
        assert_eq!(&encoded[2..18], b"w5u5ic7qeytjbg6f");
        assert_eq!(Request::decode(&encoded).unwrap(), request);
    }

    #[test]
    fn test_decode_truncated() {
        let encoded = signed("alice", "hi bob").encode().unwrap();
        for cut in [0, 1, 10, 40, encoded.len() - 1] {
            let mut frame = encoded[..cut].to_vec();
            if frame.len() >= 2 {
                let len = (frame.len() as u16).to_be_bytes();
                frame[..2].copy_from_slice(&len);
            }
            assert!(matches!(Request::decode(&frame), Err(Error::Malformed(_))));
        }
    }

    #[test]
    fn test_decode_length_mismatch() {
        let mut encoded = signed("alice", "hi bob").encode().unwrap().to_vec();
        encoded.push(0);
        assert!(matches!(Request::decode(&encoded), Err(Error::Malformed(_))));

        // Fix the length so the extra byte is trailing data
        let len = (encoded.len() as u16).to_be_bytes();
        encoded[..2].copy_from_slice(&len);
        assert!(matches!(
            Request::decode(&encoded),
            Err(Error::Malformed("trailing data"))
        ));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let mut request = signed("alice", "");
        request.nickname = String::new();
        let mut encoded = request.encode().unwrap().to_vec();

        // Replace the (empty) nickname with one invalid byte
        let nickname_at = encoded.len() - 4;
        encoded.splice(nickname_at..nickname_at + 2, [0x00, 0x01, 0xff]);
        let len = (encoded.len() as u16).to_be_bytes();
        encoded[..2].copy_from_slice(&len);
        assert!(matches!(
            Request::decode(&encoded),
            Err(Error::Malformed("string is not utf-8"))
        ));
    }

    #[test]
    fn test_verify() {
        let verified = signed("alice", "hi bob").verify(&CHALLENGE).unwrap();
        assert_eq!(verified.address, alice().network_address().unwrap());
        assert_eq!(verified.secret, [3; SECRET_LENGTH]);
        assert_eq!(verified.key, alice());
        assert!(!verified.key.is_private());
        assert_eq!(verified.nickname, "alice");
        assert_eq!(verified.message, "hi bob");

        // Nickname alone or message alone is enough
        assert!(signed("alice", "").verify(&CHALLENGE).is_ok());
        assert!(signed("", "hi bob").verify(&CHALLENGE).is_ok());
    }

    #[test]
    fn test_verify_unparsable_key() {
        let mut request = signed("alice", "hi");
        request.public_key = Bytes::from_static(b"not a key");
        assert_eq!(
            request.verify(&CHALLENGE).unwrap_err(),
            Rejection::UnparsableKey
        );
    }

    #[test]
    fn test_verify_hostname_mismatch() {
        let mut request = signed("alice", "hi");
        request.hostname = *bob().network_address().unwrap().as_bytes();
        assert_eq!(
            request.verify(&CHALLENGE).unwrap_err(),
            Rejection::HostnameMismatch
        );
    }

    #[test]
    fn test_verify_wrong_challenge() {
        let request = signed("alice", "hi");
        assert_eq!(
            request.verify(&[8; CHALLENGE_LENGTH]).unwrap_err(),
            Rejection::InvalidSignature
        );
    }

    #[test]
    fn test_verify_signature_from_other_key() {
        // Bob signs, but the request carries alice's key and address
        let mut request = signed("alice", "hi");
        request.signature = Bytes::from(bob().sign(&CHALLENGE).unwrap());
        assert_eq!(
            request.verify(&CHALLENGE).unwrap_err(),
            Rejection::InvalidSignature
        );
    }

    #[test]
    fn test_verify_empty() {
        let request = signed("", "");
        assert_eq!(request.verify(&CHALLENGE).unwrap_err(), Rejection::Empty);
    }

    #[test]
    fn test_response_codes() {
        for (response, byte) in [
            (Response::Acknowledge, 0x00),
            (Response::Accept, 0x01),
            (Response::Rejected, 0x40),
            (Response::Malformed, 0x80),
            (Response::CryptoFailure, 0x81),
            (Response::EmptyRequest, 0x82),
        ] {
            assert_eq!(u8::from(response), byte);
            assert_eq!(Response::try_from(byte).unwrap(), response);
            assert_eq!(response.closes(), byte > 0x01);
        }
        assert!(matches!(
            Response::try_from(0x41),
            Err(Error::UnknownResponse(0x41))
        ));
    }

    #[test]
    fn test_rejection_responses() {
        assert_eq!(Rejection::Malformed.response(), Response::Malformed);
        assert_eq!(Rejection::UnparsableKey.response(), Response::CryptoFailure);
        assert_eq!(
            Rejection::HostnameMismatch.response(),
            Response::CryptoFailure
        );
        assert_eq!(
            Rejection::InvalidSignature.response(),
            Response::CryptoFailure
        );
        assert_eq!(Rejection::Empty.response(), Response::EmptyRequest);
    }
}
