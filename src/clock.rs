//! A process-wide monotonic tick source.
//!
//! [`TimeLock`](crate::time_lock::TimeLock) and
//! [`CoalescingJob`](crate::coalescing::CoalescingJob) both need a cheap,
//! monotonically increasing integer tick to store in an atomic slot.
//! Measuring from a single lazily-initialized epoch keeps every tick value
//! well below the sentinel range reserved by the coalescing schedule slot
//! for as long as the process could plausibly run.

use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Ticks elapsed since the process-wide epoch, in microseconds.
pub fn now_ticks() -> i64 {
    EPOCH.elapsed().as_micros() as i64
}

/// Convert a duration to the same tick unit `now_ticks` uses.
pub fn ticks(d: Duration) -> i64 {
    d.as_micros() as i64
}
