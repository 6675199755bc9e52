//! In-memory [Socket] for exercising the request state machines.

use crate::Socket;
use std::{cell::RefCell, io, rc::Rc};

#[derive(Default)]
struct Inner {
    sent: Vec<u8>,
    closed: bool,
    fail: bool,
}

/// A socket that records everything sent through it.
///
/// Clones share state, so a test keeps one handle while the state machine owns another.
#[derive(Clone, Default)]
pub struct MockSocket(Rc<RefCell<Inner>>);

impl MockSocket {
    /// Bytes sent since the last call.
    pub fn take_sent(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.borrow_mut().sent)
    }

    /// Bytes sent and not yet taken.
    pub fn sent(&self) -> Vec<u8> {
        self.0.borrow().sent.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.0.borrow().closed
    }

    /// Make every subsequent send fail.
    pub fn fail(&self) {
        self.0.borrow_mut().fail = true;
    }
}

impl Socket for MockSocket {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.fail || inner.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock socket"));
        }
        inner.sent.extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) {
        self.0.borrow_mut().closed = true;
    }
}
