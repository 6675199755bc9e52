//! Test doubles for transports, dialing and network readiness.

use crate::{Dialer, Oracle, Socket, Transport, TransportId};
use onionlink_cryptography::Address;
use std::{
    cell::{Cell, RefCell},
    io,
    net::SocketAddr,
    rc::Rc,
};

#[derive(Default)]
struct TransportState {
    sent: Vec<u8>,
    closed: bool,
    aborted: bool,
}

/// Transport that records what happens to it. Clones share state.
#[derive(Clone, Default)]
pub struct MockTransport(Rc<RefCell<TransportState>>);

impl MockTransport {
    pub fn is_aborted(&self) -> bool {
        self.0.borrow().aborted
    }

    pub fn sent(&self) -> Vec<u8> {
        self.0.borrow().sent.clone()
    }

    /// Drain everything sent so far.
    pub fn take_sent(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.borrow_mut().sent)
    }
}

impl Socket for MockTransport {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        if state.closed || state.aborted {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "mock transport"));
        }
        state.sent.extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) {
        self.0.borrow_mut().closed = true;
    }
}

impl Transport for MockTransport {
    fn abort(&mut self) {
        self.0.borrow_mut().aborted = true;
    }
}

/// A dial made through [MockDialer].
pub type Dial = (TransportId, String, u16, MockTransport);

/// Dialer that records every attempt.
#[derive(Clone, Default)]
pub struct MockDialer(Rc<RefCell<Vec<Dial>>>);

impl MockDialer {
    pub fn dials(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn last(&self) -> Option<Dial> {
        self.0.borrow().last().cloned()
    }
}

impl Dialer for MockDialer {
    type Transport = MockTransport;

    fn dial(
        &mut self,
        _: &Address,
        id: TransportId,
        host: &str,
        port: u16,
        _: Option<SocketAddr>,
    ) -> MockTransport {
        let transport = MockTransport::default();
        self.0
            .borrow_mut()
            .push((id, host.to_string(), port, transport.clone()));
        transport
    }
}

/// Readiness oracle controlled by the test.
#[derive(Clone, Default)]
pub struct MockOracle(Rc<Cell<bool>>);

impl MockOracle {
    pub fn set_ready(&self, ready: bool) {
        self.0.set(ready);
    }
}

impl Oracle for MockOracle {
    fn is_ready(&self) -> bool {
        self.0.get()
    }

    fn proxy(&self) -> Option<SocketAddr> {
        Some(SocketAddr::from(([127, 0, 0, 1], 9050)))
    }
}
