//! One reconnecting signal source.
//!
//! A [`Connection`] owns the TCP stream (while connected), its line framer,
//! and the most recent token. Link failures never escape: the connection
//! drops back to disconnected and the session retries it on the reconnect
//! cadence.
//!
//! A link is idle, connecting, or established. A connect that is still
//! pending when the reconnect interval runs out is abandoned, so a source
//! whose handshakes vanish is retried on the same cadence as one that refuses.
//!
//! Both link transitions (connect attempt, disconnect) discard buffered bytes
//! and the latest value, so a record never shows a value received on an
//! earlier link.

use std::fmt;
use std::time::Duration;

use mio::event::Event;
use mio::{Interest, Registry};

use crate::framer::{LineFramer, SENTINEL, Token};
use crate::net::{Endpoint, ReadStatus, TcpStream};
use crate::trace::{debug, info, trace, warn};

/// Index of a signal source, rendered `out1`..`out3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(usize);

impl SourceId {
    pub const OUT1: Self = Self(0);
    pub const OUT2: Self = Self(1);
    pub const OUT3: Self = Self(2);

    /// All sources in output order.
    pub const ALL: [Self; 3] = [Self::OUT1, Self::OUT2, Self::OUT3];

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }

    /// Output field name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self.0 {
            0 => "out1",
            1 => "out2",
            _ => "out3",
        }
    }

    /// Poll registration token for this source's stream.
    #[must_use]
    pub const fn poll_token(self) -> mio::Token {
        mio::Token(self.0)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A source stream plus the state derived from it.
pub struct Connection {
    source: SourceId,
    endpoint: Endpoint,
    /// `None` while idle.
    stream: Option<TcpStream>,
    /// Monotonic ms the pending handshake started; `None` once established.
    connecting_since: Option<u64>,
    framer: LineFramer,
    latest: Option<Token>,
    /// Set when `latest` changes; cleared at every tick.
    fresh: bool,
    /// Monotonic ms of the last connect attempt.
    last_attempt: Option<u64>,
    attempts: u64,
}

impl Connection {
    #[must_use]
    pub const fn new(source: SourceId, endpoint: Endpoint) -> Self {
        Self {
            source,
            endpoint,
            stream: None,
            connecting_since: None,
            framer: LineFramer::new(),
            latest: None,
            fresh: false,
            last_attempt: None,
            attempts: 0,
        }
    }

    /// No stream, established or pending.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.stream.is_none()
    }

    /// Handshake started but not yet confirmed.
    #[must_use]
    pub const fn is_connecting(&self) -> bool {
        self.stream.is_some() && self.connecting_since.is_some()
    }

    /// Handshake confirmed; data may flow.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.stream.is_some() && self.connecting_since.is_none()
    }

    /// Connect attempts made so far.
    #[must_use]
    pub const fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Whether a connect attempt is allowed at `now_mono`.
    ///
    /// The first attempt is always allowed; afterwards at most one per
    /// `interval`.
    #[must_use]
    pub fn reconnect_due(&self, now_mono: u64, interval: Duration) -> bool {
        if self.stream.is_some() {
            return false;
        }
        let interval = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self.last_attempt
            .is_none_or(|last| now_mono.saturating_sub(last) >= interval)
    }

    /// Starts a non-blocking connect and registers the stream.
    ///
    /// The attempt is recorded whatever the outcome. Returns `true` if the
    /// stream is now registered; completion or refusal is reported later
    /// through [`on_event`](Self::on_event).
    pub fn try_connect(&mut self, registry: &Registry, now_mono: u64) -> bool {
        self.last_attempt = Some(now_mono);
        self.attempts += 1;
        self.reset_link_state();

        let mut stream = match TcpStream::connect(self.endpoint) {
            Ok(stream) => stream,
            Err(_e) => {
                debug!(source = %self.source, endpoint = %self.endpoint, attempt = self.attempts, error = %_e, "connect failed");
                return false;
            }
        };
        let interest = Interest::READABLE | Interest::WRITABLE;
        if let Err(_e) = registry.register(&mut stream, self.source.poll_token(), interest) {
            warn!(source = %self.source, endpoint = %self.endpoint, error = %_e, "stream registration failed");
            return false;
        }
        debug!(source = %self.source, endpoint = %self.endpoint, attempt = self.attempts, "connecting");
        self.stream = Some(stream);
        self.connecting_since = Some(now_mono);
        true
    }

    /// Abandons a handshake pending for `timeout` or longer.
    ///
    /// Returns `true` if the connect was dropped.
    pub fn expire_pending(&mut self, registry: &Registry, now_mono: u64, timeout: Duration) -> bool {
        let Some(since) = self.connecting_since else {
            return false;
        };
        let timeout = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        if self.stream.is_none() || now_mono.saturating_sub(since) < timeout {
            return false;
        }
        self.disconnect(registry, "connect timed out");
        true
    }

    /// Handles a readiness event for this connection's token.
    ///
    /// A pending connect is confirmed (or failed) first. Then reads until the
    /// socket is drained. End of stream, a read error, or a pending socket
    /// error disconnects.
    pub fn on_event(&mut self, registry: &Registry, event: &Event, buf: &mut [u8]) {
        if self.is_connecting() && !self.confirm_connect(registry) {
            return;
        }
        if !self.drain(registry, buf) {
            return;
        }
        if event.is_error() {
            let reason = match self.stream.as_ref().map(TcpStream::take_error) {
                Some(Ok(Some(e)) | Err(e)) => e.to_string(),
                _ => "socket error".to_owned(),
            };
            self.disconnect(registry, &reason);
        }
    }

    /// Returns `true` once the link is established.
    fn confirm_connect(&mut self, registry: &Registry) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        match stream.established() {
            Ok(false) => false,
            Ok(true) => {
                if let Err(e) = registry.reregister(stream, self.source.poll_token(), Interest::READABLE) {
                    self.disconnect(registry, &e.to_string());
                    return false;
                }
                self.connecting_since = None;
                info!(source = %self.source, endpoint = %self.endpoint, attempt = self.attempts, "connected");
                true
            }
            Err(e) => {
                self.disconnect(registry, &e.to_string());
                false
            }
        }
    }

    /// Reads until `WouldBlock`. Returns `false` if the link was lost.
    pub fn drain(&mut self, registry: &Registry, buf: &mut [u8]) -> bool {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return false;
            };
            match stream.try_read(buf) {
                Ok(ReadStatus::Data(n)) => self.ingest(&buf[..n]),
                Ok(ReadStatus::Drained) => return true,
                Ok(ReadStatus::Closed) => {
                    self.disconnect(registry, "peer closed");
                    return false;
                }
                Err(e) => {
                    self.disconnect(registry, &e.to_string());
                    return false;
                }
            }
        }
    }

    /// Feeds received bytes through the framer. The last complete token in
    /// `bytes` becomes the latest value.
    pub fn ingest(&mut self, bytes: &[u8]) {
        let _source = self.source;
        self.framer.feed(bytes, |token| {
            trace!(source = %_source, value = %token, "token");
            self.latest = Some(token);
            self.fresh = true;
        });
    }

    /// Releases the stream and forgets everything received on it.
    pub fn disconnect(&mut self, registry: &Registry, _reason: &str) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(_e) = registry.deregister(&mut stream) {
                debug!(source = %self.source, error = %_e, "deregister failed");
            }
            info!(source = %self.source, endpoint = %self.endpoint, reason = _reason, "disconnected");
        }
        self.connecting_since = None;
        self.reset_link_state();
    }

    /// Value for the current window: the latest token if it arrived since
    /// the last tick.
    #[must_use]
    pub fn snapshot(&self) -> Option<&str> {
        if self.fresh {
            self.latest.as_ref().map(Token::as_str)
        } else {
            None
        }
    }

    /// [`snapshot`](Self::snapshot) with the sentinel substituted.
    #[must_use]
    pub fn rendered(&self) -> &str {
        self.snapshot().unwrap_or(SENTINEL)
    }

    /// Closes the current window.
    pub fn end_window(&mut self) {
        self.fresh = false;
    }

    fn reset_link_state(&mut self) {
        self.framer.clear();
        self.latest = None;
        self.fresh = false;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("source", &self.source)
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .field("connecting", &self.is_connecting())
            .field("latest", &self.latest)
            .field("fresh", &self.fresh)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll};
    use std::io::Write;
    use std::net::TcpListener;
    use std::time::Instant;

    const INTERVAL: Duration = Duration::from_millis(1000);

    fn unused_endpoint() -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        Endpoint::from(listener.local_addr().unwrap())
    }

    #[test]
    fn labels() {
        assert_eq!(SourceId::OUT1.to_string(), "out1");
        assert_eq!(SourceId::OUT3.label(), "out3");
        assert_eq!(SourceId::ALL[1], SourceId::OUT2);
        assert_eq!(SourceId::OUT2.poll_token(), mio::Token(1));
    }

    #[test]
    fn reconnect_is_rate_limited() {
        let poll = Poll::new().unwrap();
        let mut conn = Connection::new(SourceId::OUT1, unused_endpoint());

        assert!(conn.reconnect_due(0, INTERVAL));
        conn.try_connect(poll.registry(), 0);
        conn.disconnect(poll.registry(), "test");

        assert!(!conn.reconnect_due(1, INTERVAL));
        assert!(!conn.reconnect_due(999, INTERVAL));
        assert!(conn.reconnect_due(1000, INTERVAL));

        conn.try_connect(poll.registry(), 1000);
        conn.disconnect(poll.registry(), "test");
        assert!(!conn.reconnect_due(1999, INTERVAL));
        assert_eq!(conn.attempts(), 2);
    }

    #[test]
    fn linked_is_never_due() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let poll = Poll::new().unwrap();
        let mut conn = Connection::new(SourceId::OUT2, Endpoint::from(listener.local_addr().unwrap()));

        assert!(conn.try_connect(poll.registry(), 0));
        assert!(conn.is_connecting());
        assert!(!conn.is_connected());
        assert!(!conn.is_idle());
        assert!(!conn.reconnect_due(5_000, INTERVAL));
    }

    #[test]
    fn pending_connect_expires_after_interval() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let poll = Poll::new().unwrap();
        let mut conn = Connection::new(SourceId::OUT1, Endpoint::from(listener.local_addr().unwrap()));

        // Never polled, so the handshake is never confirmed.
        assert!(conn.try_connect(poll.registry(), 100));
        assert!(!conn.expire_pending(poll.registry(), 1_099, INTERVAL));
        assert!(conn.is_connecting());

        assert!(conn.expire_pending(poll.registry(), 1_100, INTERVAL));
        assert!(conn.is_idle());
        assert!(conn.reconnect_due(1_100, INTERVAL));
        assert!(!conn.expire_pending(poll.registry(), 5_000, INTERVAL));
    }

    #[test]
    fn unanswered_connect_is_retried_on_cadence() {
        let mut poll = Poll::new().unwrap();
        let mut events = Events::with_capacity(8);
        // Non-routable: the handshake either fails at once or never completes.
        let mut conn = Connection::new(SourceId::OUT1, Endpoint::new_v4(10, 255, 255, 1, 4001));
        let mut buf = [0u8; 64];

        conn.try_connect(poll.registry(), 0);
        let started = Instant::now();
        while started.elapsed() < Duration::from_millis(300) {
            poll.poll(&mut events, Some(Duration::from_millis(50))).unwrap();
            for event in &events {
                conn.on_event(poll.registry(), event, &mut buf);
            }
        }
        assert!(!conn.is_connected());

        conn.expire_pending(poll.registry(), 1_000, INTERVAL);
        assert!(conn.is_idle());
        assert!(conn.reconnect_due(1_000, INTERVAL));

        conn.try_connect(poll.registry(), 1_000);
        assert_eq!(conn.attempts(), 2);
        conn.disconnect(poll.registry(), "test");
    }

    #[test]
    fn connect_is_confirmed_by_readiness() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut poll = Poll::new().unwrap();
        let mut events = Events::with_capacity(8);
        let mut conn = Connection::new(SourceId::OUT3, Endpoint::from(listener.local_addr().unwrap()));
        let mut buf = [0u8; 64];

        assert!(conn.try_connect(poll.registry(), 0));
        let _server = listener.accept().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while conn.is_connecting() && Instant::now() < deadline {
            poll.poll(&mut events, Some(Duration::from_millis(50))).unwrap();
            for event in &events {
                conn.on_event(poll.registry(), event, &mut buf);
            }
        }
        assert!(conn.is_connected());
        assert!(!conn.expire_pending(poll.registry(), 60_000, INTERVAL));
        assert!(conn.is_connected());
    }

    #[test]
    fn snapshot_requires_fresh_value() {
        let mut conn = Connection::new(SourceId::OUT1, unused_endpoint());
        assert_eq!(conn.rendered(), "--");

        conn.ingest(b"1.5\n2.5\n");
        assert_eq!(conn.snapshot(), Some("2.5"));

        conn.end_window();
        assert_eq!(conn.rendered(), "--");
        assert_eq!(conn.latest.as_ref().map(Token::as_str), Some("2.5"));

        conn.ingest(b"3.");
        assert_eq!(conn.snapshot(), None);
        conn.ingest(b"5\r\n");
        assert_eq!(conn.snapshot(), Some("3.5"));
    }

    #[test]
    fn relink_forgets_previous_value() {
        let poll = Poll::new().unwrap();
        let mut conn = Connection::new(SourceId::OUT3, unused_endpoint());

        conn.ingest(b"7.25\n9");
        assert_eq!(conn.snapshot(), Some("7.25"));

        conn.disconnect(poll.registry(), "test");
        assert_eq!(conn.rendered(), "--");

        conn.try_connect(poll.registry(), 0);
        assert_eq!(conn.rendered(), "--");

        // The partial "9" from the old link must not prefix new data.
        conn.ingest(b"1\n");
        assert_eq!(conn.snapshot(), Some("1"));
    }

    #[test]
    fn reads_from_live_stream_until_peer_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut poll = Poll::new().unwrap();
        let mut events = Events::with_capacity(8);
        let mut conn = Connection::new(SourceId::OUT1, Endpoint::from(listener.local_addr().unwrap()));
        let mut buf = [0u8; 256];

        assert!(conn.try_connect(poll.registry(), 0));
        let (mut server, _) = listener.accept().unwrap();
        server.write_all(b"0.75\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while conn.snapshot().is_none() && Instant::now() < deadline {
            poll.poll(&mut events, Some(Duration::from_millis(50))).unwrap();
            for event in &events {
                conn.on_event(poll.registry(), event, &mut buf);
            }
        }
        assert_eq!(conn.snapshot(), Some("0.75"));

        drop(server);
        let deadline = Instant::now() + Duration::from_secs(2);
        while conn.is_connected() && Instant::now() < deadline {
            poll.poll(&mut events, Some(Duration::from_millis(50))).unwrap();
            for event in &events {
                conn.on_event(poll.registry(), event, &mut buf);
            }
        }
        assert!(!conn.is_connected());
        assert_eq!(conn.rendered(), "--");
    }
}
