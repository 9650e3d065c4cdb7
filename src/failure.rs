//! Unhandled-failure hook plumbing shared by PeriodicRunner, CoalescingJob,
//! and BoundedWorkerPool.
//!
//! A plain callback slot replaces an exception-event-plus-mutable-"handled"-flag
//! pattern: the hook receives the failure and returns whether it claimed it.
//! An unclaimed failure is logged and dropped, and the owning loop continues
//! regardless.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::CoordinationError;

type Handler = dyn Fn(&CoordinationError) -> bool + Send + Sync;

/// A settable slot for a "did you handle this callback failure?" hook.
pub struct FailureHook {
    handler: RwLock<Option<Arc<Handler>>>,
}

impl FailureHook {
    /// Build a hook with no handler installed.
    pub fn new() -> Self {
        Self {
            handler: RwLock::new(None),
        }
    }

    /// Install a handler. Replaces any previously installed handler.
    pub fn set<F>(&self, handler: F)
    where
        F: Fn(&CoordinationError) -> bool + Send + Sync + 'static,
    {
        *self.handler.write() = Some(Arc::new(handler));
    }

    /// Offer a failure to the installed handler, if any. Unclaimed
    /// failures are logged at `warn` and otherwise dropped.
    pub fn dispatch(&self, failure: CoordinationError) {
        let handled = {
            let guard = self.handler.read();
            guard.as_ref().map(|h| h(&failure)).unwrap_or(false)
        };
        if !handled {
            tracing::warn!(error = %failure, "callback failure unhandled; swallowing and continuing");
        }
    }
}

impl Default for FailureHook {
    fn default() -> Self {
        Self::new()
    }
}
