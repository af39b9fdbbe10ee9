//! Unix-nanosecond timestamps and the injectable clock
//!
//! Every timestamp in the pipeline is an `i64` of Unix nanoseconds.
//! Components that need "now" (window eviction, book staleness, storage
//! expiry) take a [`Clock`] rather than reading the wall clock directly.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;

pub const NANOS_PER_MILLI: i64 = 1_000_000;
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Source of the current time in Unix nanoseconds.
pub trait Clock: Send + Sync {
    fn now_nanos(&self) -> i64;
}

/// Wall clock backed by chrono.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        let now = Utc::now();
        now.timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_millis().saturating_mul(NANOS_PER_MILLI))
    }
}

/// Manually advanced clock for tests and deterministic replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_nanos: i64) -> Self {
        Self {
            now: AtomicI64::new(start_nanos),
        }
    }

    pub fn set(&self, nanos: i64) {
        self.now.store(nanos, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_to_nanos(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Convert a duration to nanoseconds, saturating at `i64::MAX`.
pub fn duration_to_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

/// Floor a timestamp to the start of its interval.
///
/// Uses euclidean division so pre-epoch timestamps still floor downward.
pub fn align_down(timestamp_nanos: i64, interval_nanos: i64) -> i64 {
    if interval_nanos <= 0 {
        return timestamp_nanos;
    }
    timestamp_nanos.div_euclid(interval_nanos) * interval_nanos
}
