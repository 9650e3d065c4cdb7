//! TimeLock (C2)
//!
//! A time-bounded exclusive lock built from a single atomic monotonic
//! deadline.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::clock;
use crate::error::{CoordinationError, CoordinationResult};

/// A lock that, once obtained, cannot be obtained again until
/// `lock_duration` has elapsed, with no busy-waiting and no queue.
///
/// `obtain()` holds the lock iff `now < next_available`; `release()`
/// unconditionally clears the deadline back to zero.
pub struct TimeLock {
    lock_duration_ticks: i64,
    next_available: AtomicI64,
}

impl TimeLock {
    /// Build a lock that, once obtained, stays held for `lock_duration`.
    ///
    /// `std::time::Duration` cannot represent a negative value, so a
    /// negative-duration `InvalidArgument` case is enforced by the type
    /// system rather than a runtime check here.
    pub fn new(lock_duration: Duration) -> Self {
        Self {
            lock_duration_ticks: clock::ticks(lock_duration),
            next_available: AtomicI64::new(0),
        }
    }

    /// Build a lock from a millisecond count: a negative value is rejected
    /// with `InvalidArgument` rather than statically excluded.
    pub fn from_millis(lock_duration_ms: i64) -> CoordinationResult<Self> {
        if lock_duration_ms < 0 {
            return Err(CoordinationError::InvalidArgument(format!(
                "lock duration must be non-negative, got {lock_duration_ms}ms"
            )));
        }
        Ok(Self::new(Duration::from_millis(lock_duration_ms as u64)))
    }

    /// Attempt to obtain the lock. Returns `true` and holds it for
    /// `lock_duration` iff no unexpired lock currently exists. Never
    /// blocks: a loser simply returns `false`.
    pub fn obtain(&self) -> bool {
        let now = clock::now_ticks();
        let observed = self.next_available.load(Ordering::Acquire);
        if now < observed {
            return false;
        }
        let won = self
            .next_available
            .compare_exchange(
                observed,
                now + self.lock_duration_ticks,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            tracing::trace!(next_available = now + self.lock_duration_ticks, "lock obtained");
        }
        won
    }

    /// Unconditionally release the lock, regardless of who last obtained it.
    pub fn release(&self) {
        self.next_available.store(0, Ordering::Release);
    }

    /// The configured lock duration, in ticks (microseconds).
    pub fn lock_duration_ticks(&self) -> i64 {
        self.lock_duration_ticks
    }
}
