//! Wall-clock access.
//!
//! Everything that reads the time goes through [`Clock`] so tests can pin
//! it. The session arbiter uses epoch milliseconds; the router uses the
//! second-resolution label that buckets readings in the time-series window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, Utc};

/// Format used for time-bucket labels.
pub const LABEL_FORMAT: &str = "%H:%M:%S";

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current Unix time in milliseconds.
    fn now_ms(&self) -> u64;

    /// Label of the current second-resolution time bucket.
    fn time_label(&self) -> String;
}

/// The real clock. Labels are rendered in local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn time_label(&self) -> String {
        Local::now().format(LABEL_FORMAT).to_string()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time, so one handle can be given to the code
/// under test and another kept by the test to advance it. Labels are
/// rendered in UTC so they don't depend on the host time zone.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at the given Unix time in milliseconds.
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(now_ms)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn time_label(&self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.now_ms() as i64)
            .unwrap_or_default()
            .format(LABEL_FORMAT)
            .to_string()
    }
}
