//! Length-prefixed command envelope used on primary connections.
//!
//! Every command starts with a 6-byte header:
//!
//! ```txt
//! [u16 length][u8 command][u8 state][u16 identifier]
//! ```
//!
//! All integers are big-endian. `length` is one more than the number of bytes that follow the
//! header, so a command with an empty payload has a length of 1 and a length of 0 never occurs.
//! `identifier` is allocated per transport by [Identifiers] and is never zero.

use crate::Error;
use bytes::{BufMut, Bytes, BytesMut};
use std::num::NonZeroU16;
use tracing::error;

mod identifier;
pub use identifier::Identifiers;

/// Size of the command header.
pub const HEADER_SIZE: usize = 6;

/// Largest frame (header included) that the length field can describe.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + u16::MAX as usize - 1;

/// A decoded command header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub length: u16,
    pub command: u8,
    pub state: u8,
    pub identifier: NonZeroU16,
}

impl Header {
    /// Parse a header from the start of `buf`.
    ///
    /// Returns `Ok(None)` if fewer than [HEADER_SIZE] bytes are available.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, Error> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let length = u16::from_be_bytes([buf[0], buf[1]]);
        if length == 0 {
            return Err(Error::Malformed("zero command length"));
        }
        let identifier = NonZeroU16::new(u16::from_be_bytes([buf[4], buf[5]]))
            .ok_or(Error::Malformed("zero command identifier"))?;
        Ok(Some(Self {
            length,
            command: buf[2],
            state: buf[3],
            identifier,
        }))
    }

    /// Size of the payload that follows the header.
    pub fn payload_size(&self) -> usize {
        self.length as usize - 1
    }

    /// Size of the whole frame, header included.
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + self.payload_size()
    }
}

/// An encoded command, ready to be written to a transport.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Identifier allocated for this command.
    pub identifier: NonZeroU16,

    /// Header and payload.
    pub data: Bytes,

    /// Set if the payload did not fit in [MAX_FRAME_SIZE] and was cut short.
    pub truncated: bool,
}

/// A command under construction.
#[derive(Clone, Debug)]
pub struct Command {
    command: u8,
    state: u8,
    payload: BytesMut,
}

impl Command {
    /// Start a command with an empty payload.
    pub fn new(command: u8, state: u8) -> Self {
        Self::with_capacity(command, state, 0)
    }

    /// Start a command, reserving room for `capacity` payload bytes.
    pub fn with_capacity(command: u8, state: u8, capacity: usize) -> Self {
        Self {
            command,
            state,
            payload: BytesMut::with_capacity(capacity),
        }
    }

    /// The payload buffer.
    pub fn payload(&mut self) -> &mut BytesMut {
        &mut self.payload
    }

    /// Encode the command, taking an identifier from `identifiers`.
    ///
    /// A payload too large for a single frame is a bug in the caller. Debug builds panic on it,
    /// release builds behave like [Command::encode_truncated]. Running out of identifiers is
    /// fatal for the transport the command was meant for.
    pub fn encode(self, identifiers: &mut Identifiers) -> Result<Frame, Error> {
        let frame = self.encode_truncated(identifiers)?;
        debug_assert!(!frame.truncated, "command too large for a single frame");
        Ok(frame)
    }

    /// Encode the command, cutting an oversized payload down to fit [MAX_FRAME_SIZE].
    ///
    /// Truncation is reported with an error log and flagged on the returned [Frame].
    pub fn encode_truncated(mut self, identifiers: &mut Identifiers) -> Result<Frame, Error> {
        let mut truncated = false;
        if HEADER_SIZE + self.payload.len() > MAX_FRAME_SIZE {
            error!(
                command = self.command,
                size = HEADER_SIZE + self.payload.len(),
                "command too large, truncating"
            );
            self.payload.truncate(MAX_FRAME_SIZE - HEADER_SIZE);
            truncated = true;
        }

        let identifier = identifiers.acquire().ok_or(Error::IdentifiersExhausted)?;

        // Payload fits, so the length (payload + 1) fits in a u16
        let length = (self.payload.len() + 1) as u16;
        let mut data = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        data.put_u16(length);
        data.put_u8(self.command);
        data.put_u8(self.state);
        data.put_u16(identifier.get());
        data.extend_from_slice(&self.payload);

        Ok(Frame {
            identifier,
            data: data.freeze(),
            truncated,
        })
    }
}
