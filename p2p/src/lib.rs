//! Own the primary connection to each contact and keep it alive.
//!
//! Every contact has at most one authoritative ("primary") connection. It is either dialed by us
//! through the anonymizing network's proxy or pushed to us by the contact after a successful
//! contact request. When both happen at once, [Peer] decides which one wins. When the primary
//! connection drops, [Peer] fails over to a spare connection if it holds one and otherwise
//! reconnects with bounded [backoff].
//!
//! Like `onionlink-stream`, nothing here performs I/O on its own: transports are created through a
//! [Dialer], readiness of the anonymizing network is read from an [Oracle], and transport events
//! and the current time are fed in by the caller.
//!
//! # Status
//!
//! `onionlink-p2p` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

use onionlink_cryptography::Address;
use std::{fmt, net::SocketAddr, time::Duration};
use thiserror::Error;

pub mod backoff;
mod directory;
pub use directory::{Contact, Directory};
mod peer;
pub use peer::Peer;
mod requests;
pub use requests::{Incoming, Requests};
pub mod settings;

#[cfg(test)]
pub(crate) mod mocks;

pub use onionlink_stream::Socket;

/// A transport that can be dropped without flushing.
pub trait Transport: Socket {
    /// Tear down the transport immediately, discarding anything queued.
    ///
    /// No further events may be reported for an aborted transport (any that are will be
    /// ignored).
    fn abort(&mut self);
}

/// Identifies a transport owned by a [Peer].
///
/// Events for a transport are reported with its id so that events from transports that were
/// already replaced are recognized and ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(u64);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opens outbound connections.
pub trait Dialer: Clone {
    type Transport: Transport;

    /// Start connecting to `address` at `host:port`, through the SOCKS `proxy` if there is one.
    ///
    /// The returned transport is connecting. Its outcome must be reported to the [Peer] of
    /// `address` with `id`.
    fn dial(
        &mut self,
        address: &Address,
        id: TransportId,
        host: &str,
        port: u16,
        proxy: Option<SocketAddr>,
    ) -> Self::Transport;
}

/// Reports whether the anonymizing network can be used.
pub trait Oracle: Clone {
    fn is_ready(&self) -> bool;

    /// SOCKS endpoint to dial through, or `None` to dial directly.
    fn proxy(&self) -> Option<SocketAddr>;
}

/// Role requested for a promoted transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Candidate for the primary connection.
    Primary,
    /// Secondary connection (not supported).
    Auxiliary,
}

/// Connection status of a transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Connecting,
    Connected,
}

/// Changes of a contact's primary connection, as seen by upstream consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Connected(Address),
    Disconnected(Address),
}

/// Configuration for [Peer].
#[derive(Clone, Debug)]
pub struct Config {
    /// How long a connection we are still dialing may take to win against a connection pushed to
    /// us by the contact.
    pub grace: Duration,

    /// Delay between reconnection attempts.
    pub backoff: backoff::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            backoff: backoff::Config::default(),
        }
    }
}

/// Errors that can occur when managing contacts.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported role: {0:?}")]
    Unsupported(Role),
    #[error("invalid secret length: {0}")]
    InvalidSecret(usize),
    #[error("unknown peer: {0}")]
    UnknownPeer(Address),
    #[error("peer already exists: {0}")]
    PeerExists(Address),
}
