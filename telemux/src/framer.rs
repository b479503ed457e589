//! Newline framing for the source streams.
//!
//! Each source sends ASCII lines (`<number>\n` or `\r\n`). [`LineFramer`]
//! turns an arbitrary sequence of read chunks into [`Token`]s:
//!
//! - `\n` and `\r` both terminate a line, so `\r\n` yields one line plus an
//!   empty one, and empty lines are dropped.
//! - The pending (unterminated) line lives in a fixed `N`-byte buffer. Bytes
//!   past `N` are discarded until the next terminator; the buffer never grows.
//! - A finished line is cut to [`TOKEN_CONTENT_MAX`] bytes, then trimmed of
//!   ASCII whitespace. Lines with nothing left produce no token.
//! - NUL bytes are discarded on ingest.
//!
//! Output depends only on the byte sequence, never on how it was chunked.

use std::fmt;

/// Capacity of the per-connection inbound buffer.
pub const INBOUND_CAPACITY: usize = 2048;

/// Maximum stored token size, terminator included.
pub const TOKEN_MAX: usize = 512;

/// Maximum number of content bytes kept from a line.
pub const TOKEN_CONTENT_MAX: usize = TOKEN_MAX - 1;

/// Rendered in place of a value when a source has nothing to report.
pub const SENTINEL: &str = "--";

/// One decoded line value.
///
/// Invariant: non-empty, trimmed, at most [`TOKEN_CONTENT_MAX`] bytes, no
/// line terminators or NUL bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Builds a token from one raw line (terminator already removed).
    ///
    /// The raw line is cut to [`TOKEN_CONTENT_MAX`] bytes before trimming, so
    /// leading padding counts against the cap. Returns `None` when nothing
    /// is left.
    #[must_use]
    pub fn from_line(line: &[u8]) -> Option<Self> {
        let cut = line.len().min(TOKEN_CONTENT_MAX);
        let trimmed = line[..cut].trim_ascii();
        if trimmed.is_empty() {
            return None;
        }
        let mut text = String::from_utf8_lossy(trimmed).into_owned();
        // Replacement characters can push non-ASCII input back over the cap.
        if text.len() > TOKEN_CONTENT_MAX {
            let mut end = TOKEN_CONTENT_MAX;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
            text.truncate(text.trim_end().len());
        }
        (!text.is_empty()).then_some(Self(text))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stateful line decoder with a bounded pending-line buffer.
pub struct LineFramer<const N: usize = INBOUND_CAPACITY> {
    buf: [u8; N],
    len: usize,
    /// Bytes discarded from the current line because the buffer was full.
    overflow: usize,
}

impl<const N: usize> LineFramer<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
            overflow: 0,
        }
    }

    /// Feeds one chunk of received bytes, calling `emit` for every complete
    /// non-empty line, in arrival order.
    pub fn feed<F: FnMut(Token)>(&mut self, chunk: &[u8], mut emit: F) {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n' || b == b'\r') {
            self.append(&rest[..pos]);
            if let Some(token) = Token::from_line(&self.buf[..self.len]) {
                emit(token);
            }
            self.len = 0;
            self.overflow = 0;
            rest = &rest[pos + 1..];
        }
        self.append(rest);
    }

    /// Discards any partial line.
    pub fn clear(&mut self) {
        self.len = 0;
        self.overflow = 0;
    }

    /// Bytes of the unterminated line currently buffered.
    #[must_use]
    pub const fn pending(&self) -> usize {
        self.len
    }

    /// Bytes dropped from the unterminated line so far.
    #[must_use]
    pub const fn overflow(&self) -> usize {
        self.overflow
    }

    fn append(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if b == 0 {
                continue;
            }
            if self.len < N {
                self.buf[self.len] = b;
                self.len += 1;
            } else {
                self.overflow += 1;
            }
        }
    }
}

impl<const N: usize> Default for LineFramer<N> {
    fn default() -> Self {
        Self::new()
    }
}
