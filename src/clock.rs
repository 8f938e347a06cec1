//! Time source for the blocking parts of the controller
//!
//! Holdoff checks, cooldown sleeps and response timestamps all go through
//! [`Clock`], so the safety logic runs the same against wall time and
//! against a manually driven clock in tests.

use std::time::{Duration, Instant};

/// Monotonic time plus a blocking sleep
pub trait Clock: Send {
    fn now(&self) -> Instant;

    /// Blocks the calling step for `duration`
    fn sleep(&self, duration: Duration);
}

/// Real monotonic clock backed by `std::time::Instant`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
pub use manual::ManualClock;
