//! Non-blocking TCP stream for a signal source.
//!
//! Wraps [`mio::net::TcpStream`]. Connecting never blocks: the OS finishes the
//! handshake in the background. Completion is signalled by a writable event,
//! after which [`TcpStream::established`] tells success from refusal.

use std::io::{self, ErrorKind, Read};

use mio::event::Source;
use mio::net::TcpStream as MioTcpStream;
use mio::{Interest, Registry, Token};

use super::Endpoint;

/// A non-blocking, readable TCP stream.
pub struct TcpStream {
    inner: MioTcpStream,
}

/// Result of a single non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` bytes were copied into the buffer.
    Data(usize),
    /// Nothing more to read right now.
    Drained,
    /// Peer closed the stream.
    Closed,
}

impl TcpStream {
    /// Starts a non-blocking connect to `peer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or the connect fails
    /// synchronously (for example, an unroutable address).
    pub fn connect(peer: Endpoint) -> io::Result<Self> {
        let inner = MioTcpStream::connect(peer.into())?;
        Ok(Self { inner })
    }

    /// Whether the handshake started by [`connect`](Self::connect) finished.
    ///
    /// `Ok(false)` means still in progress.
    ///
    /// # Errors
    ///
    /// The handshake failed (refused, unreachable, reset).
    pub fn established(&self) -> io::Result<bool> {
        if let Some(e) = self.inner.take_error()? {
            return Err(e);
        }
        match self.inner.peer_addr() {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Reads once, mapping `WouldBlock` to [`ReadStatus::Drained`] and a zero
    /// length read to [`ReadStatus::Closed`].
    ///
    /// `Interrupted` is retried in place.
    ///
    /// # Errors
    ///
    /// Any other I/O error (reset, refused, ...).
    pub fn try_read(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus> {
        loop {
            match self.inner.read(buf) {
                Ok(0) => return Ok(ReadStatus::Closed),
                Ok(n) => return Ok(ReadStatus::Data(n)),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(ReadStatus::Drained),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Pending socket error, if any (`SO_ERROR`).
    ///
    /// # Errors
    ///
    /// Returns an error if the option cannot be read.
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        self.inner.take_error()
    }
}

impl Source for TcpStream {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.inner.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.inner.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.inner.deregister(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    fn read_until_data(stream: &mut TcpStream, buf: &mut [u8]) -> ReadStatus {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match stream.try_read(buf) {
                Ok(ReadStatus::Drained) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                other => return other.unwrap(),
            }
        }
    }

    #[test]
    fn connect_and_read_line() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = Endpoint::from(listener.local_addr().unwrap());

        let mut stream = TcpStream::connect(peer).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        server.write_all(b"1.25\n").unwrap();

        let mut buf = [0u8; 32];
        let status = read_until_data(&mut stream, &mut buf);
        assert_eq!(status, ReadStatus::Data(5));
        assert_eq!(&buf[..5], b"1.25\n");
        assert!(stream.established().unwrap());
    }

    #[test]
    fn refused_connect_is_reported() {
        let peer = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            Endpoint::from(listener.local_addr().unwrap())
        };
        // Loopback may refuse synchronously; that is reported too.
        let Ok(stream) = TcpStream::connect(peer) else {
            return;
        };
        let deadline = Instant::now() + Duration::from_secs(2);
        let outcome = loop {
            match stream.established() {
                Ok(false) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                other => break other,
            }
        };
        assert!(outcome.is_err(), "{outcome:?}");
    }

    #[test]
    fn peer_close_reads_as_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = Endpoint::from(listener.local_addr().unwrap());

        let mut stream = TcpStream::connect(peer).unwrap();
        let (server, _) = listener.accept().unwrap();
        drop(server);

        let mut buf = [0u8; 8];
        assert_eq!(read_until_data(&mut stream, &mut buf), ReadStatus::Closed);
    }
}
