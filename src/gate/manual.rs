//! ManualGate (C4): a manual-reset event.
//!
//! `wait()` suspends until the gate is opened; `set()` opens it (idempotent,
//! wakes every current waiter); `reset()` atomically swaps in a fresh closed
//! cell so that a waiter who already holds a reference to the pre-reset
//! cell still observes it as open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Notify;

struct Cell {
    open: AtomicBool,
    notify: Notify,
}

/// A manual-reset event: stays open across any number of `wait()`s until
/// explicitly `reset()`.
pub struct ManualGate {
    slot: ArcSwap<Cell>,
}

impl ManualGate {
    /// Build a gate, open or closed as given.
    pub fn new(initial_open: bool) -> Self {
        Self {
            slot: ArcSwap::new(Arc::new(Cell {
                open: AtomicBool::new(initial_open),
                notify: Notify::new(),
            })),
        }
    }

    /// Suspend until the gate transitions to open. Returns immediately if
    /// it already is.
    pub async fn wait(&self) {
        let cell = self.slot.load_full();
        if cell.open.load(Ordering::Acquire) {
            return;
        }
        let notified = cell.notify.notified();
        tokio::pin!(notified);
        if cell.open.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    /// Open the gate, waking every current waiter. Idempotent.
    pub fn set(&self) {
        let cell = self.slot.load_full();
        if !cell.open.swap(true, Ordering::AcqRel) {
            cell.notify.notify_waiters();
        }
    }

    /// Atomically replace the completion cell with a fresh closed one, iff
    /// the current cell is open. Concurrent resets converge to exactly one
    /// reset: only the caller whose compare-and-swap observes the cell it
    /// read actually performs the replacement.
    pub fn reset(&self) {
        let current = self.slot.load_full();
        if !current.open.load(Ordering::Acquire) {
            return;
        }
        let fresh = Arc::new(Cell {
            open: AtomicBool::new(false),
            notify: Notify::new(),
        });
        self.slot.compare_and_swap(&current, fresh);
    }

    /// Non-suspending poll of the current state.
    pub fn is_open(&self) -> bool {
        self.slot.load_full().open.load(Ordering::Acquire)
    }
}

impl Default for ManualGate {
    fn default() -> Self {
        Self::new(false)
    }
}
