//! Monotonic clock abstraction
//!
//! All protocol waiting is expressed as comparisons against a millisecond
//! monotonic clock resolved on a later poll; nothing ever blocks. The clock
//! is injectable so tests can step time explicitly.

use std::cell::Cell;
use std::time::Instant;

pub trait Clock {
    /// Milliseconds since some fixed, monotonic origin.
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by `std::time::Instant`.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually stepped clock for tests.
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Cell::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}
