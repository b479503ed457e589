//! Time sources for the event loop.
//!
//! Two clocks are needed: wall time for the tick grid (timestamps are epoch
//! milliseconds) and a monotonic clock for reconnect pacing, which must not
//! jump when the wall clock is adjusted.

use std::time::{SystemTime, UNIX_EPOCH};

use minstant::Instant;

/// Millisecond time source.
pub trait Clock {
    /// Milliseconds since the Unix epoch.
    fn wall_ms(&self) -> u64;

    /// Milliseconds on a monotonic clock with an arbitrary origin.
    fn mono_ms(&self) -> u64;
}

/// The system clocks.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn wall_ms(&self) -> u64 {
        // A clock set before 1970 reads as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    fn mono_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn wall_ms(&self) -> u64 {
        (**self).wall_ms()
    }

    fn mono_ms(&self) -> u64 {
        (**self).mono_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_is_past_2020() {
        let clock = SystemClock::new();
        assert!(clock.wall_ms() > 1_577_836_800_000);
    }

    #[test]
    fn monotonic_clock_advances() {
        let clock = SystemClock::new();
        let a = clock.mono_ms();
        std::thread::sleep(std::time::Duration::from_millis(15));
        let b = clock.mono_ms();
        assert!(b >= a + 10, "a={a} b={b}");
    }
}
