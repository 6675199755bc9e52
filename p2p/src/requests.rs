use onionlink_cryptography::{Address, IdentityKey};
use onionlink_stream::request::{Arbiter, Verdict, Verified, SECRET_LENGTH};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// An incoming contact request waiting for the user.
#[derive(Clone, Debug)]
pub struct Incoming {
    pub session: u64,
    pub key: IdentityKey,
    pub secret: [u8; SECRET_LENGTH],
    pub nickname: String,
    pub message: String,
}

/// Tracks contact requests in both directions and arbitrates validated incoming ones.
///
/// An incoming request is accepted without asking anyone if we have an outgoing request pending
/// to the same address (both sides want the relationship), rejected if the address is blocked,
/// and deferred otherwise.
#[derive(Debug, Default)]
pub struct Requests {
    outgoing: BTreeSet<Address>,
    blocked: BTreeSet<Address>,
    incoming: BTreeMap<Address, Incoming>,
}

impl Requests {
    /// Record that we sent a contact request to `address`.
    pub fn outgoing(&mut self, address: Address) {
        self.outgoing.insert(address);
    }

    /// Forget an outgoing request. Returns `false` if there was none.
    pub fn cancel(&mut self, address: &Address) -> bool {
        self.outgoing.remove(address)
    }

    pub fn is_outgoing(&self, address: &Address) -> bool {
        self.outgoing.contains(address)
    }

    /// Reject all future requests from `address`, dropping any pending one.
    pub fn block(&mut self, address: Address) {
        self.incoming.remove(&address);
        self.blocked.insert(address);
    }

    pub fn unblock(&mut self, address: &Address) -> bool {
        self.blocked.remove(address)
    }

    pub fn is_blocked(&self, address: &Address) -> bool {
        self.blocked.contains(address)
    }

    /// Pending incoming request from `address`.
    pub fn incoming(&self, address: &Address) -> Option<&Incoming> {
        self.incoming.get(address)
    }

    /// Addresses with a pending incoming request.
    pub fn pending(&self) -> impl Iterator<Item = &Address> {
        self.incoming.keys()
    }

    /// Remove a pending incoming request once it has been decided.
    pub fn decided(&mut self, address: &Address) -> Option<Incoming> {
        self.incoming.remove(address)
    }
}

impl Arbiter for Requests {
    fn validated(&mut self, session: u64, request: &Verified) -> Verdict {
        let address = request.address;
        if self.blocked.contains(&address) {
            debug!(peer = %address, session, "rejecting request from blocked address");
            return Verdict::Reject;
        }
        if self.outgoing.remove(&address) {
            debug!(peer = %address, session, "accepting request matching outgoing request");
            return Verdict::Accept;
        }
        debug!(peer = %address, session, "deferring request");
        self.incoming.insert(
            address,
            Incoming {
                session,
                key: request.key.clone(),
                secret: request.secret,
                nickname: request.nickname.clone(),
                message: request.message.clone(),
            },
        );
        Verdict::Defer
    }

    fn abandoned(&mut self, session: u64, address: &Address) {
        // A newer request from the same address may have replaced this one
        if self
            .incoming
            .get(address)
            .is_some_and(|incoming| incoming.session == session)
        {
            debug!(peer = %address, session, "dropping abandoned request");
            self.incoming.remove(address);
        }
    }
}
