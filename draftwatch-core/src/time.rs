//! Clock abstraction for prediction and replay
//!
//! Every prediction is anchored to "now": the query window reaches back
//! from the current instant. Taking the clock as a trait keeps that anchor
//! injectable, so tests and replays over recorded data evaluate against
//! the time the data was recorded, not the wall clock of the test run.

/// Timestamp in milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Source of the current time.
pub trait TimeSource {
    /// Get current timestamp in milliseconds.
    fn now(&self) -> Timestamp;

    /// Check if this source tracks wall clock time (vs a replay clock).
    fn is_wall_clock(&self) -> bool;
}

/// Wall clock backed by the operating system (requires std).
#[cfg(feature = "std")]
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

#[cfg(feature = "std")]
impl TimeSource for SystemClock {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime, UNIX_EPOCH};

        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }

    fn is_wall_clock(&self) -> bool {
        true
    }
}

/// Fixed clock for tests and replay over recorded data.
#[derive(Debug, Clone)]
pub struct FixedClock {
    timestamp: Timestamp,
}

impl FixedClock {
    /// Create a clock pinned to the given instant.
    pub fn new(timestamp: Timestamp) -> Self {
        Self { timestamp }
    }

    /// Pin the clock to a new instant.
    pub fn set(&mut self, timestamp: Timestamp) {
        self.timestamp = timestamp;
    }

    /// Move the clock forward.
    pub fn advance(&mut self, ms: u64) {
        self.timestamp += ms;
    }
}

impl TimeSource for FixedClock {
    fn now(&self) -> Timestamp {
        self.timestamp
    }

    fn is_wall_clock(&self) -> bool {
        false
    }
}
