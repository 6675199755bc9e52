//! Connecting side of the contact-request handshake.

use super::{Request, Response, CHALLENGE_LENGTH, SECRET_LENGTH};
use crate::{Error, Socket};
use bytes::{Buf, BytesMut};
use onionlink_cryptography::IdentityKey;
use tracing::debug;

/// Result of feeding a [Client].
pub enum Outcome<S> {
    /// Waiting for the challenge or a response.
    Pending,
    /// The listener acknowledged the request; its decision arrives later.
    Acknowledged,
    /// The request was accepted and the transport is handed over.
    Accepted(S),
    /// The request was declined and the transport closed.
    Rejected(Response),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    AwaitingChallenge,
    AwaitingResponse,
    Closed,
}

/// Sends a contact request over an outbound connection.
pub struct Client<S: Socket> {
    socket: Option<S>,
    identity: IdentityKey,
    secret: [u8; SECRET_LENGTH],
    nickname: String,
    message: String,

    buffer: BytesMut,
    state: State,
}

impl<S: Socket> Client<S> {
    /// Prepare a request on a connected `socket`. Nothing is sent until the challenge arrives.
    pub fn new(
        socket: S,
        identity: IdentityKey,
        secret: [u8; SECRET_LENGTH],
        nickname: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            socket: Some(socket),
            identity,
            secret,
            nickname: nickname.into(),
            message: message.into(),
            buffer: BytesMut::with_capacity(CHALLENGE_LENGTH),
            state: State::AwaitingChallenge,
        }
    }

    /// Handle bytes received on the transport.
    ///
    /// Any bytes following an accept are dropped along with the handshake buffer.
    pub fn receive(&mut self, data: &[u8]) -> Result<Outcome<S>, Error> {
        if self.state == State::Closed {
            return Err(Error::Closed);
        }
        self.buffer.extend_from_slice(data);

        if self.state == State::AwaitingChallenge {
            if self.buffer.len() < CHALLENGE_LENGTH {
                return Ok(Outcome::Pending);
            }
            let challenge = self.buffer.split_to(CHALLENGE_LENGTH);
            if let Err(err) = self.send_request(&challenge) {
                self.close();
                return Err(err);
            }
            self.state = State::AwaitingResponse;
        }

        let mut outcome = Outcome::Pending;
        while self.buffer.has_remaining() {
            let response = match Response::try_from(self.buffer.get_u8()) {
                Ok(response) => response,
                Err(err) => {
                    self.close();
                    return Err(err);
                }
            };
            debug!(?response, "received response");
            match response {
                Response::Acknowledge => outcome = Outcome::Acknowledged,
                Response::Accept => {
                    self.state = State::Closed;
                    self.buffer.clear();
                    let socket = self.socket.take().ok_or(Error::Closed)?;
                    return Ok(Outcome::Accepted(socket));
                }
                rejected => {
                    self.close();
                    return Ok(Outcome::Rejected(rejected));
                }
            }
        }
        Ok(outcome)
    }

    /// Close the transport.
    pub fn close(&mut self) {
        self.state = State::Closed;
        self.buffer.clear();
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
    }

    fn send_request(&mut self, challenge: &[u8]) -> Result<(), Error> {
        let request = Request::sign(
            &self.identity,
            challenge,
            self.secret,
            &self.nickname,
            &self.message,
        )?
        .encode()?;
        let socket = self.socket.as_mut().ok_or(Error::Closed)?;
        socket.send(&request).map_err(Error::SendFailed)
    }
}
