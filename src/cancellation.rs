//! Cancellation handles
//!
//! A [`CancellationHandle`] is a cooperative, observable one-shot flag: once
//! [`cancel`](CancellationHandle::cancel) fires, it stays fired forever, and
//! every in-progress and future call to [`cancelled`](CancellationHandle::cancelled)
//! resolves immediately. [`LinkedCancellation`] composes one such handle (the
//! caller's own, disposable trigger) with an immutable parent handle so that
//! either side firing wakes every waiter. This is the primitive
//! [`crate::delay::CancellableDelay`] swaps under compare-and-swap on every
//! cancellation cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// An observable, one-shot cancellation flag.
///
/// Cloning shares the underlying flag: cancelling one clone cancels all of
/// them. There is no way to un-cancel a handle.
#[derive(Clone)]
pub struct CancellationHandle {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationHandle {
    /// Create a fresh, not-yet-cancelled handle.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Trigger this handle. Idempotent: cancelling an already-cancelled
    /// handle is a no-op.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            tracing::trace!("cancellation handle triggered");
            self.inner.notify.notify_waiters();
        }
    }

    /// Non-suspending poll of the current state.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Suspend until this handle is cancelled. Resolves immediately if it
    /// already is.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        // Register for the notification before re-checking, so a `cancel()`
        // racing with this call can't be missed between the check and the
        // wait.
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle's own trigger linked to an immutable parent: fires when either
/// side fires.
///
/// `LinkedCancellation` never tries to propagate cancellation *upward* to
/// the parent; only the parent's existing state is observed. Triggering
/// [`own`](LinkedCancellation::own) cancels only this linked view, leaving
/// the parent untouched, which is exactly what lets
/// [`CancellableDelay::cancel`](crate::delay::CancellableDelay::cancel) wake
/// waiters on the current source without disturbing the caller-supplied
/// parent handle.
#[derive(Clone)]
pub struct LinkedCancellation {
    parent: CancellationHandle,
    own: CancellationHandle,
}

impl LinkedCancellation {
    /// Link a fresh local trigger to `parent`.
    pub fn new(parent: CancellationHandle) -> Self {
        Self {
            parent,
            own: CancellationHandle::new(),
        }
    }

    /// Trigger the local side only.
    pub fn trigger_own(&self) {
        self.own.cancel();
    }

    /// True if either the parent or the local trigger has fired.
    pub fn is_cancelled(&self) -> bool {
        self.parent.is_cancelled() || self.own.is_cancelled()
    }

    /// True specifically because the *parent* fired (as opposed to the
    /// local trigger). Callers use this to decide whether a wake should
    /// surface [`crate::error::CoordinationError::Cancelled`] or be
    /// swallowed.
    pub fn parent_is_cancelled(&self) -> bool {
        self.parent.is_cancelled()
    }

    /// Suspend until either side fires.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.parent.cancelled() => {}
            _ = self.own.cancelled() => {}
        }
    }
}
