//! Time handling for the metrics engine
//!
//! Every engine operation that cares about age (staleness checks, history
//! windowing, debounce deadlines) takes `now` as an explicit argument, so
//! the engine itself is deterministic. The `Clock` trait exists for the
//! driving event loop and for tests:
//! - `WallClock` reads the system clock (milliseconds since the Unix epoch)
//! - `ManualClock` is advanced by hand, for deterministic tests

/// Timestamp in milliseconds since the Unix epoch
pub type Timestamp = u64;

/// Source of "now" for the driving event loop
pub trait Clock {
    /// Current timestamp in milliseconds
    fn now(&self) -> Timestamp;
}

/// System wall clock
#[derive(Debug, Clone, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime, UNIX_EPOCH};

        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

/// Manually-advanced clock for testing
#[derive(Debug, Clone)]
pub struct ManualClock {
    timestamp: Timestamp,
}

impl ManualClock {
    /// Create a clock frozen at the given timestamp
    pub fn new(timestamp: Timestamp) -> Self {
        Self { timestamp }
    }

    /// Jump to an absolute timestamp
    pub fn set(&mut self, timestamp: Timestamp) {
        self.timestamp = timestamp;
    }

    /// Advance by the given number of milliseconds
    pub fn advance(&mut self, ms: u64) {
        self.timestamp += ms;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.timestamp
    }
}
