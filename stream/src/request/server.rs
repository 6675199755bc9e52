//! Listener side of the contact-request handshake.

use super::{Config, Rejection, Request, Response, Verified, CHALLENGE_LENGTH, MIN_REQUEST_SIZE};
use crate::{Error, Socket};
use bytes::BytesMut;
use onionlink_cryptography::Address;
use rand::{CryptoRng, RngCore};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Immediate verdict of an [Arbiter] on a validated request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Promote the connection right away (e.g. we already asked the sender ourselves).
    Accept,
    /// Decline without involving anyone (e.g. the sender is blocked).
    Reject,
    /// Acknowledge and wait for [Server::decide].
    Defer,
}

/// Decides what happens to requests that passed validation.
pub trait Arbiter {
    fn validated(&mut self, session: u64, request: &Verified) -> Verdict;

    /// A request from `address` that was deferred by `session` can no longer be decided.
    fn abandoned(&mut self, session: u64, address: &Address);
}

/// A decision made after a request was deferred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// State of a [Session].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    AwaitingRequest,
    AwaitingDecision,
    Closed,
}

/// An accepted request, along with the transport it arrived on.
pub struct Promotion<S> {
    /// Id of the session the request arrived on.
    pub session: u64,
    pub socket: S,
    pub request: Verified,
}

/// Result of feeding a [Session].
pub enum Progress<S> {
    /// Waiting for more bytes (or for a decision).
    Pending,
    /// The request was acknowledged; a decision is required.
    Deferred(Address),
    /// The request was accepted and the transport is handed over.
    Accepted(Promotion<S>),
    /// The request was declined with the given response and the transport closed.
    Rejected(Response),
    /// The transport went away.
    Closed,
}

/// Handshake with a single inbound connection.
pub struct Session<S: Socket> {
    id: u64,
    max_request_size: usize,
    challenge: [u8; CHALLENGE_LENGTH],

    socket: Option<S>,
    buffer: BytesMut,
    state: State,
    request: Option<Verified>,
}

impl<S: Socket> Session<S> {
    /// Start a session on a freshly accepted `socket` by sending it a new challenge.
    pub fn new<R: RngCore + CryptoRng>(
        rng: &mut R,
        config: &Config,
        id: u64,
        mut socket: S,
    ) -> Result<Self, Error> {
        let mut challenge = [0u8; CHALLENGE_LENGTH];
        rng.fill_bytes(&mut challenge);
        if let Err(err) = socket.send(&challenge) {
            socket.close();
            return Err(Error::SendFailed(err));
        }

        Ok(Self {
            id,
            max_request_size: config.max_request_size,
            challenge,
            socket: Some(socket),
            buffer: BytesMut::new(),
            state: State::AwaitingRequest,
            request: None,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn challenge(&self) -> &[u8; CHALLENGE_LENGTH] {
        &self.challenge
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The validated request, while awaiting a decision.
    pub fn request(&self) -> Option<&Verified> {
        self.request.as_ref()
    }

    /// Handle bytes received on the transport.
    ///
    /// Only one request is processed: once it has been parsed, anything else the client sends is
    /// discarded.
    pub fn receive(&mut self, data: &[u8], arbiter: &mut impl Arbiter) -> Progress<S> {
        match self.state {
            State::AwaitingRequest => {}
            State::AwaitingDecision => return Progress::Pending,
            State::Closed => return Progress::Closed,
        }

        self.buffer.extend_from_slice(data);
        if self.buffer.len() < 2 {
            return Progress::Pending;
        }
        let declared = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
        if declared < MIN_REQUEST_SIZE || declared > self.max_request_size {
            warn!(session = self.id, declared, "invalid request length");
            return self.reject(Rejection::Malformed.response());
        }
        if self.buffer.len() < declared {
            return Progress::Pending;
        }
        let frame = self.buffer.split_to(declared);
        self.buffer.clear();

        let request = match Request::decode(&frame) {
            Ok(request) => request,
            Err(err) => {
                warn!(session = self.id, ?err, "malformed request");
                return self.reject(Rejection::Malformed.response());
            }
        };
        let verified = match request.verify(&self.challenge) {
            Ok(verified) => verified,
            Err(rejection) => {
                warn!(session = self.id, ?rejection, "invalid request");
                return self.reject(rejection.response());
            }
        };
        debug!(session = self.id, peer = %verified.address, "validated request");

        match arbiter.validated(self.id, &verified) {
            Verdict::Accept => self.accept(verified),
            Verdict::Reject => self.reject(Response::Rejected),
            Verdict::Defer => {
                if !self.respond(Response::Acknowledge) {
                    arbiter.abandoned(self.id, &verified.address);
                    return Progress::Closed;
                }
                let address = verified.address;
                self.request = Some(verified);
                self.state = State::AwaitingDecision;
                Progress::Deferred(address)
            }
        }
    }

    /// Apply a decision to a deferred request.
    pub fn decide(&mut self, decision: Decision) -> Result<Progress<S>, Error> {
        if self.state != State::AwaitingDecision {
            return Err(Error::NotAwaitingDecision);
        }
        let request = self.request.take().ok_or(Error::NotAwaitingDecision)?;
        Ok(match decision {
            Decision::Accept => self.accept(request),
            Decision::Reject => self.reject(Response::Rejected),
        })
    }

    /// Close the transport and end the session.
    pub fn close(&mut self) {
        self.state = State::Closed;
        self.request = None;
        self.buffer.clear();
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
    }

    fn respond(&mut self, response: Response) -> bool {
        let Some(socket) = self.socket.as_mut() else {
            return false;
        };
        if let Err(err) = socket.send(&[u8::from(response)]) {
            debug!(session = self.id, ?err, "failed to send response");
            self.close();
            return false;
        }
        true
    }

    fn accept(&mut self, request: Verified) -> Progress<S> {
        if !self.respond(Response::Accept) {
            return Progress::Closed;
        }
        self.state = State::Closed;
        match self.socket.take() {
            Some(socket) => Progress::Accepted(Promotion {
                session: self.id,
                socket,
                request,
            }),
            None => Progress::Closed,
        }
    }

    fn reject(&mut self, response: Response) -> Progress<S> {
        if !self.respond(response) {
            return Progress::Closed;
        }
        self.close();
        Progress::Rejected(response)
    }
}

/// Every live handshake of a listener.
///
/// Finished sessions are not dropped while they are being handled: they are queued and removed
/// at the next [Server::collect].
pub struct Server<S: Socket, R: RngCore + CryptoRng> {
    config: Config,
    rng: R,

    next: u64,
    sessions: HashMap<u64, Session<S>>,
    deferred: HashMap<Address, u64>,
    finished: Vec<u64>,
}

impl<S: Socket, R: RngCore + CryptoRng> Server<S, R> {
    pub fn new(rng: R, config: Config) -> Self {
        Self {
            config,
            rng,
            next: 0,
            sessions: HashMap::new(),
            deferred: HashMap::new(),
            finished: Vec::new(),
        }
    }

    /// Start a session for an accepted connection, returning its id.
    pub fn accept(&mut self, socket: S) -> Result<u64, Error> {
        let id = self.next;
        self.next += 1;
        let session = Session::new(&mut self.rng, &self.config, id, socket)?;
        debug!(session = id, "accepted connection");
        self.sessions.insert(id, session);
        Ok(id)
    }

    /// Feed bytes received by session `id`.
    pub fn receive(&mut self, id: u64, data: &[u8], arbiter: &mut impl Arbiter) -> Progress<S> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Progress::Closed;
        };
        let progress = session.receive(data, arbiter);
        match &progress {
            Progress::Pending => {}
            Progress::Deferred(address) => {
                let replaced = self.deferred.insert(*address, id);
                if let Some(previous) = replaced.filter(|previous| *previous != id) {
                    // The newer request from the same address supersedes the older one
                    debug!(session = previous, peer = %address, "replaced deferred request");
                    if let Some(session) = self.sessions.get_mut(&previous) {
                        session.close();
                    }
                    arbiter.abandoned(previous, address);
                    self.finished.push(previous);
                }
            }
            Progress::Accepted(_) | Progress::Rejected(_) | Progress::Closed => {
                self.finish(id);
            }
        }
        progress
    }

    /// Decide the deferred request from `address`.
    pub fn decide(&mut self, address: &Address, decision: Decision) -> Result<Progress<S>, Error> {
        let id = self
            .deferred
            .remove(address)
            .ok_or(Error::NoPendingRequest(*address))?;
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(Error::NoPendingRequest(*address))?;
        let progress = session.decide(decision)?;
        self.finished.push(id);
        Ok(progress)
    }

    /// The transport of session `id` disconnected.
    ///
    /// A request still awaiting a decision is reported to `arbiter` as abandoned.
    pub fn disconnected(&mut self, id: u64, arbiter: &mut impl Arbiter) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        debug!(session = id, "connection lost");
        let deferred = session.request().map(|request| request.address);
        session.close();
        if let Some(address) = deferred {
            arbiter.abandoned(id, &address);
        }
        self.finish(id);
    }

    /// Drop finished sessions, returning how many were removed.
    pub fn collect(&mut self) -> usize {
        let mut removed = 0;
        for id in self.finished.drain(..) {
            if self.sessions.remove(&id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub fn session(&self, id: u64) -> Option<&Session<S>> {
        self.sessions.get(&id)
    }

    /// Addresses with a request awaiting a decision.
    pub fn deferred(&self) -> impl Iterator<Item = &Address> {
        self.deferred.keys()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn finish(&mut self, id: u64) {
        self.deferred.retain(|_, session| *session != id);
        self.finished.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mocks::MockSocket, request::SECRET_LENGTH};
    use bytes::Bytes;
    use onionlink_cryptography::{fixtures, IdentityKey};
    use rand::{rngs::StdRng, SeedableRng};

    struct Fixed {
        verdict: Verdict,
        seen: Vec<(u64, Address)>,
        abandoned: Vec<(u64, Address)>,
    }

    impl Fixed {
        fn new(verdict: Verdict) -> Self {
            Self {
                verdict,
                seen: Vec::new(),
                abandoned: Vec::new(),
            }
        }
    }

    impl Arbiter for Fixed {
        fn validated(&mut self, session: u64, request: &Verified) -> Verdict {
            self.seen.push((session, request.address));
            self.verdict
        }

        fn abandoned(&mut self, session: u64, address: &Address) {
            self.abandoned.push((session, *address));
        }
    }

    fn key(pem: &str) -> IdentityKey {
        IdentityKey::load(pem.as_bytes(), true).unwrap()
    }

    fn request(identity: &IdentityKey, challenge: &[u8], nickname: &str, message: &str) -> Bytes {
        Request::sign(identity, challenge, [5; SECRET_LENGTH], nickname, message)
            .unwrap()
            .encode()
            .unwrap()
    }

    fn session(seed: u64) -> (Session<MockSocket>, MockSocket) {
        let socket = MockSocket::default();
        let mut rng = StdRng::seed_from_u64(seed);
        let session = Session::new(&mut rng, &Config::default(), seed, socket.clone()).unwrap();
        (session, socket)
    }

    #[test]
    fn test_challenge_sent() {
        let (first, socket) = session(0);
        assert_eq!(socket.sent(), first.challenge().to_vec());
        assert_eq!(first.state(), State::AwaitingRequest);

        let (second, _) = session(1);
        assert_ne!(first.challenge(), second.challenge());
    }

    #[test]
    fn test_challenge_send_failure() {
        let socket = MockSocket::default();
        socket.fail();
        let mut rng = StdRng::seed_from_u64(0);
        let result = Session::new(&mut rng, &Config::default(), 0, socket.clone());
        assert!(matches!(result, Err(Error::SendFailed(_))));
        assert!(socket.is_closed());
    }

    #[test]
    fn test_accept_now() {
        let (mut session, socket) = session(0);
        socket.take_sent();
        let alice = key(fixtures::ALICE);
        let mut arbiter = Fixed::new(Verdict::Accept);

        let frame = request(&alice, session.challenge(), "alice", "hello");
        let Progress::Accepted(promotion) = session.receive(&frame, &mut arbiter) else {
            panic!("request not accepted");
        };
        assert_eq!(promotion.request.address, alice.network_address().unwrap());
        assert_eq!(promotion.request.secret, [5; SECRET_LENGTH]);
        assert_eq!(arbiter.seen, vec![(0, promotion.request.address)]);

        // Only the accept byte is sent and the transport stays open
        assert_eq!(socket.take_sent(), vec![0x01]);
        assert!(!socket.is_closed());
        assert_eq!(session.state(), State::Closed);
        assert!(matches!(session.receive(b"more", &mut arbiter), Progress::Closed));
    }

    #[test]
    fn test_reject_now() {
        let (mut session, socket) = session(0);
        socket.take_sent();
        let frame = request(&key(fixtures::ALICE), session.challenge(), "alice", "");
        let progress = session.receive(&frame, &mut Fixed::new(Verdict::Reject));
        assert!(matches!(progress, Progress::Rejected(Response::Rejected)));
        assert_eq!(socket.take_sent(), vec![0x40]);
        assert!(socket.is_closed());
    }

    #[test]
    fn test_defer_then_accept() {
        let (mut session, socket) = session(0);
        socket.take_sent();
        let alice = key(fixtures::ALICE);
        let mut arbiter = Fixed::new(Verdict::Defer);

        let frame = request(&alice, session.challenge(), "", "hello");
        let progress = session.receive(&frame, &mut arbiter);
        let expected = alice.network_address().unwrap();
        assert!(matches!(progress, Progress::Deferred(address) if address == expected));
        assert_eq!(socket.take_sent(), vec![0x00]);
        assert_eq!(session.state(), State::AwaitingDecision);
        assert_eq!(session.request().unwrap().message, "hello");

        // Further bytes are discarded, even another valid request
        assert!(matches!(session.receive(&frame, &mut arbiter), Progress::Pending));
        assert!(matches!(session.receive(b"junk", &mut arbiter), Progress::Pending));
        assert!(socket.take_sent().is_empty());
        assert_eq!(arbiter.seen.len(), 1);

        let Ok(Progress::Accepted(promotion)) = session.decide(Decision::Accept) else {
            panic!("decision not applied");
        };
        assert_eq!(promotion.request.message, "hello");
        assert_eq!(socket.take_sent(), vec![0x01]);
        assert!(!socket.is_closed());
        assert!(matches!(
            session.decide(Decision::Accept),
            Err(Error::NotAwaitingDecision)
        ));
    }

    #[test]
    fn test_defer_then_reject() {
        let (mut session, socket) = session(0);
        socket.take_sent();
        let frame = request(&key(fixtures::ALICE), session.challenge(), "alice", "");
        session.receive(&frame, &mut Fixed::new(Verdict::Defer));
        socket.take_sent();

        let progress = session.decide(Decision::Reject).unwrap();
        assert!(matches!(progress, Progress::Rejected(Response::Rejected)));
        assert_eq!(socket.take_sent(), vec![0x40]);
        assert!(socket.is_closed());
    }

    #[test]
    fn test_decide_before_request() {
        let (mut session, _) = session(0);
        assert!(matches!(
            session.decide(Decision::Accept),
            Err(Error::NotAwaitingDecision)
        ));
    }

    #[test]
    fn test_wrong_challenge() {
        let (mut session, socket) = session(0);
        socket.take_sent();
        let mut arbiter = Fixed::new(Verdict::Accept);

        // Signed over some other session's challenge
        let frame = request(&key(fixtures::ALICE), &[0; CHALLENGE_LENGTH], "alice", "hi");
        let progress = session.receive(&frame, &mut arbiter);
        assert!(matches!(progress, Progress::Rejected(Response::CryptoFailure)));
        assert_eq!(socket.take_sent(), vec![0x81]);
        assert!(socket.is_closed());
        assert!(arbiter.seen.is_empty());
    }

    #[test]
    fn test_hostname_mismatch() {
        let (mut session, socket) = session(0);
        socket.take_sent();
        let bob = key(fixtures::BOB);
        let mut request =
            Request::sign(&key(fixtures::ALICE), session.challenge(), [0; SECRET_LENGTH], "a", "")
                .unwrap();
        request.hostname = *bob.network_address().unwrap().as_bytes();

        let mut arbiter = Fixed::new(Verdict::Accept);
        let progress = session.receive(&request.encode().unwrap(), &mut arbiter);
        assert!(matches!(progress, Progress::Rejected(Response::CryptoFailure)));
        assert_eq!(socket.take_sent(), vec![0x81]);
    }

    #[test]
    fn test_empty_request() {
        let (mut session, socket) = session(0);
        socket.take_sent();
        let frame = request(&key(fixtures::ALICE), session.challenge(), "", "");
        let progress = session.receive(&frame, &mut Fixed::new(Verdict::Accept));
        assert!(matches!(progress, Progress::Rejected(Response::EmptyRequest)));
        assert_eq!(socket.take_sent(), vec![0x82]);
        assert!(socket.is_closed());
    }

    #[test]
    fn test_malformed_request() {
        let (mut session, socket) = session(0);
        socket.take_sent();

        // Valid length, but empty fields followed by trailing garbage
        let mut frame = vec![0u8; 60];
        frame[1] = 60;
        let progress = session.receive(&frame, &mut Fixed::new(Verdict::Accept));
        assert!(matches!(progress, Progress::Rejected(Response::Malformed)));
        assert_eq!(socket.take_sent(), vec![0x80]);
        assert!(socket.is_closed());
    }

    #[test]
    fn test_invalid_length() {
        let (mut session, socket) = session(0);
        socket.take_sent();
        let progress = session.receive(&[0x00, 0x05], &mut Fixed::new(Verdict::Accept));
        assert!(matches!(progress, Progress::Rejected(Response::Malformed)));
        assert_eq!(socket.take_sent(), vec![0x80]);

        // Larger than configured
        let socket = MockSocket::default();
        let mut rng = StdRng::seed_from_u64(0);
        let config = Config {
            max_request_size: 100,
        };
        let mut session = Session::new(&mut rng, &config, 0, socket.clone()).unwrap();
        socket.take_sent();
        let progress = session.receive(&[0x00, 0x65], &mut Fixed::new(Verdict::Accept));
        assert!(matches!(progress, Progress::Rejected(Response::Malformed)));
    }

    #[test]
    fn test_partial_frames() {
        let (mut session, socket) = session(0);
        socket.take_sent();
        let mut arbiter = Fixed::new(Verdict::Defer);
        let frame = request(&key(fixtures::ALICE), session.challenge(), "alice", "hi");

        let (last, rest) = frame.split_last().unwrap();
        for byte in rest {
            assert!(matches!(
                session.receive(&[*byte], &mut arbiter),
                Progress::Pending
            ));
        }
        assert!(socket.sent().is_empty());
        assert!(arbiter.seen.is_empty());

        let progress = session.receive(&[*last], &mut arbiter);
        assert!(matches!(progress, Progress::Deferred(_)));
        assert_eq!(socket.take_sent(), vec![0x00]);
    }

    #[test]
    fn test_acknowledge_send_failure() {
        let (mut session, socket) = session(0);
        let frame = request(&key(fixtures::ALICE), session.challenge(), "alice", "hi");
        socket.fail();
        let mut arbiter = Fixed::new(Verdict::Defer);
        let progress = session.receive(&frame, &mut arbiter);
        assert!(matches!(progress, Progress::Closed));
        assert!(socket.is_closed());
        assert_eq!(session.state(), State::Closed);

        // The arbiter already saw the request, so it learns it cannot be decided
        let address = key(fixtures::ALICE).network_address().unwrap();
        assert_eq!(arbiter.abandoned, vec![(0, address)]);
    }

    #[test]
    fn test_server_registry() {
        let mut server = Server::new(StdRng::seed_from_u64(0), Config::default());
        let mut arbiter = Fixed::new(Verdict::Defer);
        let alice = key(fixtures::ALICE);
        let bob = key(fixtures::BOB);
        let alice_address = alice.network_address().unwrap();
        let bob_address = bob.network_address().unwrap();

        let alice_socket = MockSocket::default();
        let bob_socket = MockSocket::default();
        let first = server.accept(alice_socket.clone()).unwrap();
        let second = server.accept(bob_socket.clone()).unwrap();
        assert_ne!(first, second);
        assert_eq!(server.len(), 2);

        let challenge = alice_socket.take_sent();
        let frame = request(&alice, &challenge, "alice", "");
        assert!(matches!(
            server.receive(first, &frame, &mut arbiter),
            Progress::Deferred(_)
        ));
        let challenge = bob_socket.take_sent();
        let frame = request(&bob, &challenge, "bob", "");
        assert!(matches!(
            server.receive(second, &frame, &mut arbiter),
            Progress::Deferred(_)
        ));
        assert_eq!(server.deferred().count(), 2);

        // Nothing is finished yet
        assert_eq!(server.collect(), 0);

        let Ok(Progress::Accepted(promotion)) = server.decide(&bob_address, Decision::Accept)
        else {
            panic!("bob not accepted");
        };
        assert_eq!(promotion.request.nickname, "bob");
        assert_eq!(promotion.session, second);
        assert!(matches!(
            server.decide(&bob_address, Decision::Accept),
            Err(Error::NoPendingRequest(_))
        ));
        assert_eq!(server.len(), 2);
        assert_eq!(server.collect(), 1);
        assert_eq!(server.len(), 1);
        assert!(arbiter.abandoned.is_empty());

        // Losing the connection forgets the deferred request
        server.disconnected(first, &mut arbiter);
        assert!(alice_socket.is_closed());
        assert_eq!(arbiter.abandoned, vec![(first, alice_address)]);
        assert!(matches!(
            server.decide(&alice_address, Decision::Reject),
            Err(Error::NoPendingRequest(_))
        ));
        assert_eq!(server.collect(), 1);
        assert!(server.is_empty());
        assert!(matches!(
            server.receive(first, b"late", &mut arbiter),
            Progress::Closed
        ));
    }

    #[test]
    fn test_server_rejection_collected() {
        let mut server = Server::new(StdRng::seed_from_u64(0), Config::default());
        let socket = MockSocket::default();
        let id = server.accept(socket.clone()).unwrap();
        let progress = server.receive(id, &[0x00, 0x01], &mut Fixed::new(Verdict::Defer));
        assert!(matches!(progress, Progress::Rejected(Response::Malformed)));
        assert!(server.session(id).is_some());
        assert_eq!(server.collect(), 1);
        assert!(server.session(id).is_none());
    }

    #[test]
    fn test_server_replaces_deferred() {
        let mut server = Server::new(StdRng::seed_from_u64(0), Config::default());
        let mut arbiter = Fixed::new(Verdict::Defer);
        let alice = key(fixtures::ALICE);

        let old_socket = MockSocket::default();
        let new_socket = MockSocket::default();
        let old = server.accept(old_socket.clone()).unwrap();
        let new = server.accept(new_socket.clone()).unwrap();
        let frame = request(&alice, &old_socket.take_sent(), "alice", "first");
        server.receive(old, &frame, &mut arbiter);
        let frame = request(&alice, &new_socket.take_sent(), "alice", "second");
        server.receive(new, &frame, &mut arbiter);

        // The older session is closed without a response
        let address = alice.network_address().unwrap();
        assert!(old_socket.is_closed());
        assert_eq!(old_socket.take_sent(), vec![0x00]);
        assert_eq!(arbiter.abandoned, vec![(old, address)]);
        assert_eq!(server.collect(), 1);


        let Ok(Progress::Accepted(promotion)) = server.decide(&address, Decision::Accept) else {
            panic!("newer request not accepted");
        };
        assert_eq!(promotion.request.message, "second");
        assert_eq!(new_socket.take_sent(), vec![0x00, 0x01]);
    }
}
