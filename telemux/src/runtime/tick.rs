//! Aligned tick grid.
//!
//! Deadlines live on the lattice `k * window` in epoch milliseconds, so two
//! clients with the same window emit records stamped with the same instants.
//! A loop that falls behind skips the missed points instead of bursting.

use std::time::Duration;

use crate::config::WindowSize;

/// Smallest multiple of `window` that is `>= now`.
#[must_use]
pub const fn align_up(now: u64, window: u64) -> u64 {
    match now % window {
        0 => now,
        rem => now + (window - rem),
    }
}

/// Next emission deadline on the window lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickGrid {
    window: u64,
    next_deadline: u64,
}

impl TickGrid {
    /// Grid whose first deadline is the first multiple of `window` at or
    /// after `now`.
    #[must_use]
    pub const fn starting_at(now: u64, window: WindowSize) -> Self {
        let window = window.as_millis();
        Self {
            window,
            next_deadline: align_up(now, window),
        }
    }

    /// Epoch-ms timestamp of the next record.
    #[must_use]
    pub const fn deadline(&self) -> u64 {
        self.next_deadline
    }

    #[must_use]
    pub const fn is_due(&self, now: u64) -> bool {
        now >= self.next_deadline
    }

    /// Time left until the deadline, clamped to `[0, cap]`.
    #[must_use]
    pub fn wait_budget(&self, now: u64, cap: Duration) -> Duration {
        Duration::from_millis(self.next_deadline.saturating_sub(now)).min(cap)
    }

    /// Consumes the current deadline and moves to the first lattice point
    /// strictly after `now`. Returns the consumed deadline.
    ///
    /// Call only when [`is_due`](Self::is_due) holds.
    pub fn advance(&mut self, now: u64) -> u64 {
        let emitted = self.next_deadline;
        let behind = now.saturating_sub(emitted);
        let skipped = behind / self.window + 1;
        self.next_deadline = emitted + skipped * self.window;
        emitted
    }
}
