//! Clock sources.
//!
//! Record timestamps are taken from a [`StreamClock`] when a record is
//! written, never when it is applied, so replaying the log yields the same
//! state regardless of wall-clock time. Tests pin the clock with
//! [`ControlledClock`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond clock used to stamp newly written records.
pub trait StreamClock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn millis(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl StreamClock for SystemClock {
    fn millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ControlledClock {
    now: AtomicI64,
}

impl ControlledClock {
    /// Create a clock pinned at the given time.
    pub fn new(millis: i64) -> Self {
        Self {
            now: AtomicI64::new(millis),
        }
    }

    /// Pin the clock at an absolute time.
    pub fn pin(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl StreamClock for ControlledClock {
    fn millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn StreamClock>;

/// The default clock for a running node.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
