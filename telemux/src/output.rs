//! Emitted records.
//!
//! One JSON object per line:
//!
//! ```text
//! {"timestamp":1700000000100,"out1":"1.25","out2":"--","out3":"0.5"}
//! ```
//!
//! `timestamp` is the aligned tick in epoch milliseconds. The `outN` fields
//! are the raw token text, or `"--"` when the source produced nothing during
//! the window.

use std::io::{self, Write};

use serde::Serialize;

/// One snapshot of all three sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Record<'a> {
    pub timestamp: u64,
    pub out1: &'a str,
    pub out2: &'a str,
    pub out3: &'a str,
}

impl<'a> Record<'a> {
    #[must_use]
    pub const fn new(timestamp: u64, [out1, out2, out3]: [&'a str; 3]) -> Self {
        Self {
            timestamp,
            out1,
            out2,
            out3,
        }
    }
}

/// Destination for emitted records.
pub trait RecordSink {
    /// Writes one record.
    ///
    /// # Errors
    ///
    /// Returns the underlying write error. The session logs it and keeps
    /// running.
    fn emit(&mut self, record: &Record<'_>) -> io::Result<()>;
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn emit(&mut self, record: &Record<'_>) -> io::Result<()> {
        (**self).emit(record)
    }
}

/// Compact JSON lines, flushed after every record.
#[derive(Debug)]
pub struct JsonLines<W> {
    writer: W,
}

impl<W: Write> JsonLines<W> {
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLines<io::Stdout> {
    /// Sink writing to the process's stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> RecordSink for JsonLines<W> {
    fn emit(&mut self, record: &Record<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// Keeps every record in memory. Useful for tests and embedding.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Collected {
    pub records: Vec<OwnedRecord>,
}

/// Owned form of [`Record`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedRecord {
    pub timestamp: u64,
    pub out1: String,
    pub out2: String,
    pub out3: String,
}

impl From<&Record<'_>> for OwnedRecord {
    fn from(r: &Record<'_>) -> Self {
        Self {
            timestamp: r.timestamp,
            out1: r.out1.to_owned(),
            out2: r.out2.to_owned(),
            out3: r.out3.to_owned(),
        }
    }
}

impl RecordSink for Collected {
    fn emit(&mut self, record: &Record<'_>) -> io::Result<()> {
        self.records.push(record.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_line_layout() {
        let mut sink = JsonLines::new(Vec::new());
        sink.emit(&Record::new(1700, ["1.5", "--", "--"])).unwrap();
        sink.emit(&Record::new(1800, ["--", "-0.25", "12"])).unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            text,
            "{\"timestamp\":1700,\"out1\":\"1.5\",\"out2\":\"--\",\"out3\":\"--\"}\n\
             {\"timestamp\":1800,\"out1\":\"--\",\"out2\":\"-0.25\",\"out3\":\"12\"}\n"
        );
    }

    #[test]
    fn token_text_is_escaped() {
        let mut sink = JsonLines::new(Vec::new());
        sink.emit(&Record::new(0, ["a\"b", "c\\d", "\u{1}"])).unwrap();
        let line = String::from_utf8(sink.into_inner()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed["out1"], "a\"b");
        assert_eq!(parsed["out2"], "c\\d");
        assert_eq!(parsed["out3"], "\u{1}");
    }

    #[test]
    fn collected_keeps_order() {
        let mut sink = Collected::default();
        sink.emit(&Record::new(20, ["1", "2", "3"])).unwrap();
        sink.emit(&Record::new(40, ["--", "--", "--"])).unwrap();
        assert_eq!(sink.records.len(), 2);
        assert_eq!(sink.records[0].out3, "3");
        assert_eq!(sink.records[1].timestamp, 40);
    }
}
