//! CancellableDelay (C1)
//!
//! A delay source whose in-progress waiters can be woken on demand without
//! disturbing the parent cancellation handle, and without ever reusing a
//! one-shot cancellation trigger.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::cancellation::{CancellationHandle, LinkedCancellation};
use crate::error::{CoordinationError, CoordinationResult};

/// A cancellable delay source.
///
/// `delay(d)` suspends for at least `d`, returns early if [`cancel`](Self::cancel)
/// is called, or fails with [`CoordinationError::Cancelled`] if the parent
/// handle fires. `cancel()` wakes every in-progress `delay` call and leaves
/// the source ready to accept new delays.
pub struct CancellableDelay {
    parent: CancellationHandle,
    /// The current inner cancellation source, linked to the immutable
    /// parent. Swapped under compare-and-swap by every `cancel()`; never
    /// reused once triggered.
    source: ArcSwap<LinkedCancellation>,
}

impl CancellableDelay {
    /// Build a delay source cancellable via `parent` in addition to its own
    /// `cancel()`.
    pub fn new(parent: CancellationHandle) -> Self {
        let initial = Arc::new(LinkedCancellation::new(parent.clone()));
        Self {
            parent,
            source: ArcSwap::new(initial),
        }
    }

    /// Build a delay source with no parent cancellation handle.
    pub fn unparented() -> Self {
        Self::new(CancellationHandle::new())
    }

    /// Suspend for at least `d`, or return early on `cancel()`, or fail with
    /// `Cancelled` if the parent fires.
    pub async fn delay(&self, d: Duration) -> CoordinationResult<()> {
        let source = self.source.load_full();
        tokio::select! {
            _ = tokio::time::sleep(d) => Ok(()),
            _ = source.cancelled() => {
                if source.parent_is_cancelled() {
                    Err(CoordinationError::Cancelled)
                } else {
                    // Our own `cancel()` woke us; this is an implementation
                    // detail of the wake-up, not a cancellation the caller
                    // asked for.
                    Ok(())
                }
            }
        }
    }

    /// Wake every in-progress `delay()` call. A no-op once the parent has
    /// already fired.
    pub fn cancel(&self) {
        if self.parent.is_cancelled() {
            return;
        }

        let current = self.source.load_full();
        let next = Arc::new(LinkedCancellation::new(self.parent.clone()));
        let previous = self.source.compare_and_swap(&current, next);

        if Arc::ptr_eq(&previous, &current) {
            // We won the race: the slot held exactly what we observed, so
            // it is now safe to fire the source every existing waiter is
            // parked on.
            current.trigger_own();
        }
        // CAS lost: another `cancel()` already swapped in a fresh source
        // and triggered the one we observed. Our intent, wake whoever was
        // waiting on the current source, is already satisfied.
    }
}
