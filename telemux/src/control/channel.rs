//! Fire-and-forget control channel.
//!
//! One unconnected UDP socket, one fixed destination. Every message is sent
//! exactly once; a failed or would-block send is logged and dropped, never
//! retried and never surfaced to the event loop.

use std::io;

use crate::net::{Endpoint, UdpSocket};
use crate::trace::{debug, trace, warn};

use super::protocol::{ControlMessage, ObjectId, PropertyId, WRITE_LEN, encode_message};

/// Sends encoded [`ControlMessage`]s to the control endpoint.
pub struct ControlChannel {
    socket: UdpSocket,
    destination: Endpoint,
    /// Reusable buffer for encoding messages.
    encode_buf: Vec<u8>,
    sent: u64,
    dropped: u64,
}

impl ControlChannel {
    /// Binds a local socket able to reach `destination`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or bound. This is the
    /// one control-channel failure that is fatal, and only at startup.
    pub fn open(destination: Endpoint) -> io::Result<Self> {
        let socket = UdpSocket::bind(destination.local_wildcard())?;
        debug!(
            local_addr = ?socket.local_addr().ok(),
            destination = %destination,
            "control channel bound"
        );
        Ok(Self {
            socket,
            destination,
            encode_buf: Vec::with_capacity(WRITE_LEN),
            sent: 0,
            dropped: 0,
        })
    }

    /// Sends one message. Returns `true` if the OS accepted the datagram.
    pub fn send(&mut self, msg: &ControlMessage) -> bool {
        encode_message(msg, &mut self.encode_buf);
        match self.socket.try_send_to(&self.encode_buf, self.destination) {
            Ok(Some(_)) => {
                self.sent += 1;
                trace!(destination = %self.destination, message = ?msg, "control message sent");
                true
            }
            Ok(None) => {
                self.dropped += 1;
                warn!(destination = %self.destination, message = ?msg, "control socket would block, message dropped");
                false
            }
            Err(_e) => {
                self.dropped += 1;
                warn!(destination = %self.destination, message = ?msg, error = %_e, "control send failed");
                false
            }
        }
    }

    /// Sends every message in order; returns how many the OS accepted.
    pub fn send_all(&mut self, msgs: &[ControlMessage]) -> usize {
        msgs.iter().filter(|msg| self.send(msg)).count()
    }

    /// Sets `property` of `object` to `value`.
    pub fn send_write(&mut self, object: ObjectId, property: PropertyId, value: u16) -> bool {
        self.send(&ControlMessage::Write {
            object,
            property,
            value,
        })
    }

    /// Requests the current value of `property`. The reply is not read.
    pub fn send_read(&mut self, object: ObjectId, property: PropertyId) -> bool {
        self.send(&ControlMessage::Read { object, property })
    }

    /// Datagrams handed to the OS so far.
    #[must_use]
    pub const fn sent(&self) -> u64 {
        self.sent
    }

    /// Messages dropped because the send failed.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}
