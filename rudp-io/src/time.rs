//! Wall-clock helpers for driving channel updates
//!
//! Channels keep their own clock and only move it when `update(delta)` is
//! called. These helpers measure the deltas.

use std::time::{Duration, Instant};

/// Measures the time between successive ticks
#[derive(Debug)]
pub struct DeltaClock {
    start: Instant,
    last_tick: Instant,
    /// Largest delta a single tick reports
    max_delta: Duration,
}

impl DeltaClock {
    /// Create a clock whose deltas are capped at `max_delta`
    ///
    /// A stalled process would otherwise hand the channels one huge delta
    /// and time out every packet in flight at once.
    pub fn new(max_delta: Duration) -> Self {
        let now = Instant::now();
        DeltaClock {
            start: now,
            last_tick: now,
            max_delta,
        }
    }

    /// Time since the previous tick (or creation), capped
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now.duration_since(self.last_tick);
        self.last_tick = now;
        delta.min(self.max_delta)
    }

    /// Time since the clock was created
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Timer for periodic operations
///
/// Used for periodic statistics reports.
#[derive(Debug)]
pub struct Timer {
    interval: Duration,
    last_fire: Instant,
}

impl Timer {
    /// Create a new timer with the given interval
    pub fn new(interval: Duration) -> Self {
        Timer {
            interval,
            last_fire: Instant::now(),
        }
    }

    /// Check if the timer has expired
    pub fn expired(&self) -> bool {
        self.last_fire.elapsed() >= self.interval
    }

    pub fn reset(&mut self) {
        self.last_fire = Instant::now();
    }

    /// Get time until next expiration
    pub fn time_until_expiration(&self) -> Duration {
        self.interval.saturating_sub(self.last_fire.elapsed())
    }

    /// Fire the timer if expired, returning true if it fired
    pub fn try_fire(&mut self) -> bool {
        if self.expired() {
            self.reset();
            true
        } else {
            false
        }
    }
}
