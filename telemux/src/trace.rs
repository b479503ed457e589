//! Diagnostic logging for the telemetry client.
//!
//! The `tracing` feature (default) routes the crate's log macros to the
//! `tracing` crate. With the feature off they swallow their arguments.
//!
//! Diagnostics are written to stderr; stdout carries only records.

/// Installs the stderr subscriber.
///
/// `RUST_LOG` selects the filter, with `telemux=info` when unset. Call at
/// most once per process; the integration tests wrap it in a `Once`.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("telemux=info"));

    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(fmt::time::uptime())
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry().with(stderr).with(filter).init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing"))]
pub(crate) use silent::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing"))]
mod silent {
    macro_rules! noop {
        ($($arg:tt)*) => {};
    }

    pub(crate) use noop as debug;
    pub(crate) use noop as error;
    pub(crate) use noop as info;
    pub(crate) use noop as trace;
    pub(crate) use noop as warn;
}
