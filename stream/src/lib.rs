//! Frame commands and exchange contact requests over arbitrary transport.
//!
//! Everything in this crate is driven by the caller: bytes that arrive on a transport are handed
//! to a state machine, which writes its replies through the [Socket] it owns. Nothing here blocks,
//! spawns or sleeps, so the same code runs under any event loop (and in tests without one).
//!
//! # Status
//!
//! `onionlink-stream` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

use onionlink_cryptography::{Address, Error as CryptoError};
use thiserror::Error;

pub mod command;
pub mod request;

#[cfg(test)]
pub(crate) mod mocks;

/// A connected byte transport owned by exactly one state machine at a time.
///
/// Ownership moves by value: a handshake session owns its socket until it hands it to a peer
/// connection, and only the current owner may write to or close it.
pub trait Socket {
    /// Queue `data` for delivery.
    fn send(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Flush anything queued and close the transport.
    fn close(&mut self);
}

/// Errors that can occur when framing commands or handling contact requests.
#[derive(Error, Debug)]
pub enum Error {
    // Framing errors
    #[error("malformed: {0}")]
    Malformed(&'static str),
    #[error("field too large: {0} bytes")]
    FieldTooLarge(usize),
    #[error("request too large: {0} bytes")]
    RequestTooLarge(usize),
    #[error("identifiers exhausted")]
    IdentifiersExhausted,

    // Session errors
    #[error("send failed: {0}")]
    SendFailed(std::io::Error),
    #[error("session closed")]
    Closed,
    #[error("not awaiting a decision")]
    NotAwaitingDecision,
    #[error("no pending request from {0}")]
    NoPendingRequest(Address),
    #[error("unknown response: {0:#04x}")]
    UnknownResponse(u8),

    #[error("cryptography: {0}")]
    Cryptography(#[from] CryptoError),
}
