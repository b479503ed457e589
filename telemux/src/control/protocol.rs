//! Binary control protocol spoken to the signal server's control port.
//!
//! # Wire Format
//!
//! Every field is a 16-bit unsigned big-endian integer:
//!
//! ```text
//! READ  (6 bytes)  ┌────────────┬─────────────┬───────────────┐
//!                  │ Opcode=1   │ Object ID   │ Property ID   │
//!                  └────────────┴─────────────┴───────────────┘
//! WRITE (8 bytes)  ┌────────────┬─────────────┬───────────────┬───────────┐
//!                  │ Opcode=2   │ Object ID   │ Property ID   │ Value     │
//!                  └────────────┴─────────────┴───────────────┴───────────┘
//! ```
//!
//! The server may answer a READ, but nothing here consumes the reply.

use std::fmt;
use thiserror::Error;

/// Opcode discriminants.
pub mod opcode {
    pub const READ: u16 = 1;
    pub const WRITE: u16 = 2;
}

/// Encoded size of a READ message.
pub const READ_LEN: usize = 6;

/// Encoded size of a WRITE message.
pub const WRITE_LEN: usize = 8;

/// Identifies a controllable object on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(u16);

impl ObjectId {
    /// The first signal output (`out1`), the one the controller retunes.
    pub const OUTPUT_1: Self = Self(1);

    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for ObjectId {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a property of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyId(u16);

impl PropertyId {
    pub const AMPLITUDE: Self = Self(170);
    pub const FREQUENCY: Self = Self(255);

    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for PropertyId {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::AMPLITUDE => f.write_str("amplitude"),
            Self::FREQUENCY => f.write_str("frequency"),
            Self(other) => write!(f, "{other}"),
        }
    }
}

/// A control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Ask the server for a property's current value.
    Read {
        object: ObjectId,
        property: PropertyId,
    },
    /// Set a property.
    Write {
        object: ObjectId,
        property: PropertyId,
        value: u16,
    },
}

impl ControlMessage {
    /// Encoded size in bytes.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        match self {
            Self::Read { .. } => READ_LEN,
            Self::Write { .. } => WRITE_LEN,
        }
    }
}

/// Errors during control message decode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too small to hold the next field.
    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },
    /// First field is not a known opcode.
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u16),
    /// Bytes left over after a complete message.
    #[error("invalid message length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Writer for encoding control messages.
struct MessageWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> MessageWriter<'a> {
    fn new(buf: &'a mut Vec<u8>) -> Self {
        buf.clear();
        Self { buf }
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
}

/// Reader for decoding control messages.
struct MessageReader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> MessageReader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.cursor
    }

    fn take_u16(&mut self) -> Result<u16, ProtocolError> {
        if self.remaining() < 2 {
            return Err(ProtocolError::BufferTooSmall {
                need: 2,
                have: self.remaining(),
            });
        }
        let mut arr = [0u8; 2];
        arr.copy_from_slice(&self.buf[self.cursor..self.cursor + 2]);
        self.cursor += 2;
        Ok(u16::from_be_bytes(arr))
    }

    fn finish(&self, expected: usize) -> Result<(), ProtocolError> {
        if self.buf.len() != expected {
            return Err(ProtocolError::InvalidLength {
                expected,
                actual: self.buf.len(),
            });
        }
        Ok(())
    }
}

/// Encode a control message into the buffer.
///
/// The buffer is cleared and reused (preserves capacity).
pub fn encode_message(msg: &ControlMessage, buf: &mut Vec<u8>) {
    let mut w = MessageWriter::new(buf);

    match *msg {
        ControlMessage::Read { object, property } => {
            w.put_u16(opcode::READ);
            w.put_u16(object.as_u16());
            w.put_u16(property.as_u16());
        }
        ControlMessage::Write {
            object,
            property,
            value,
        } => {
            w.put_u16(opcode::WRITE);
            w.put_u16(object.as_u16());
            w.put_u16(property.as_u16());
            w.put_u16(value);
        }
    }
}

/// Decode a control message from exactly one datagram.
pub fn decode_message(bytes: &[u8]) -> Result<ControlMessage, ProtocolError> {
    let mut r = MessageReader::new(bytes);

    match r.take_u16()? {
        opcode::READ => {
            let object = ObjectId::from(r.take_u16()?);
            let property = PropertyId::from(r.take_u16()?);
            r.finish(READ_LEN)?;
            Ok(ControlMessage::Read { object, property })
        }
        opcode::WRITE => {
            let object = ObjectId::from(r.take_u16()?);
            let property = PropertyId::from(r.take_u16()?);
            let value = r.take_u16()?;
            r.finish(WRITE_LEN)?;
            Ok(ControlMessage::Write {
                object,
                property,
                value,
            })
        }
        other => Err(ProtocolError::UnknownOpcode(other)),
    }
}
