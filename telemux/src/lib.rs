//! Three-source telemetry client.
//!
//! Connects to three line-oriented TCP signal sources, keeps the latest value
//! from each, and emits one aligned JSON record per window. The control
//! variant also compares one source against a threshold and retunes an
//! output over a small UDP command protocol.

pub mod config;
pub mod connection;
pub mod control;
pub mod framer;
pub mod net;
pub mod output;
pub mod runtime;

mod trace;

pub use config::{ControlConfig, SessionConfig, WindowSize};
pub use connection::SourceId;
pub use output::{JsonLines, Record, RecordSink};
pub use runtime::{Session, SessionError};
pub use trace::init_tracing;
