//! Session configuration.
//!
//! Two presets match the two deployment variants:
//!
//! - [`SessionConfig::monitor`]: 100ms window, passive. Also the default.
//! - [`SessionConfig::control`]: 20ms window, threshold controller on `out3`
//!   retuning `out1` over the control channel.
//!
//! Everything else is builder-style overrides on top of a preset.

use std::fmt;
use std::num::NonZeroU64;
use std::time::Duration;

use crate::connection::SourceId;
use crate::control::{ObjectId, OutputSetting};
use crate::net::Endpoint;

/// Number of signal sources. Fixed.
pub const SOURCE_COUNT: usize = 3;

/// Default source ports, in `out1`..`out3` order.
pub const DEFAULT_SOURCE_PORTS: [u16; SOURCE_COUNT] = [4001, 4002, 4003];

/// Default control port.
pub const DEFAULT_CONTROL_PORT: u16 = 4000;

/// Emission window in milliseconds. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowSize(NonZeroU64);

impl WindowSize {
    /// Monitor variant window.
    pub const MONITOR: Self = Self(NonZeroU64::new(100).unwrap());
    /// Control variant window.
    pub const CONTROL: Self = Self(NonZeroU64::new(20).unwrap());

    /// Returns `None` for a zero window.
    #[must_use]
    pub const fn from_millis(ms: u64) -> Option<Self> {
        match NonZeroU64::new(ms) {
            Some(ms) => Some(Self(ms)),
            None => None,
        }
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Threshold controller and control channel settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlConfig {
    /// Where control datagrams are sent.
    pub destination: Endpoint,
    /// Source whose value is compared with the threshold.
    pub source: SourceId,
    pub threshold: f64,
    /// Object retuned on each transition.
    pub object: ObjectId,
    /// Setting written when the value reaches the threshold.
    pub at_or_above: OutputSetting,
    /// Setting written when the value drops below the threshold.
    pub below: OutputSetting,
    /// Follow every write pair with reads of both properties.
    pub verify: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            destination: Endpoint::localhost(DEFAULT_CONTROL_PORT),
            source: SourceId::OUT3,
            threshold: 3.0,
            object: ObjectId::OUTPUT_1,
            at_or_above: OutputSetting::AT_OR_ABOVE,
            below: OutputSetting::BELOW,
            verify: true,
        }
    }
}

/// Configuration for a [`Session`](crate::runtime::Session).
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Spacing of emitted records.
    pub window: WindowSize,
    /// Source endpoints, in `out1`..`out3` order.
    pub sources: [Endpoint; SOURCE_COUNT],
    /// Threshold control; `None` runs the passive monitor.
    pub control: Option<ControlConfig>,
    /// Minimum spacing of connect attempts per source.
    pub reconnect_interval: Duration,
    /// Upper bound on a single poll wait.
    pub max_wait: Duration,
}

impl SessionConfig {
    /// 100ms passive monitor.
    #[must_use]
    pub fn monitor() -> Self {
        Self {
            window: WindowSize::MONITOR,
            sources: DEFAULT_SOURCE_PORTS.map(Endpoint::localhost),
            control: None,
            reconnect_interval: Duration::from_millis(1000),
            max_wait: Duration::from_millis(2000),
        }
    }

    /// 20ms window with the threshold controller enabled.
    #[must_use]
    pub fn control() -> Self {
        Self {
            window: WindowSize::CONTROL,
            control: Some(ControlConfig::default()),
            ..Self::monitor()
        }
    }

    #[must_use]
    pub const fn with_window(mut self, window: WindowSize) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub const fn with_sources(mut self, sources: [Endpoint; SOURCE_COUNT]) -> Self {
        self.sources = sources;
        self
    }

    #[must_use]
    pub fn with_control(mut self, control: Option<ControlConfig>) -> Self {
        self.control = control;
        self
    }

    #[must_use]
    pub const fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::monitor()
    }
}
