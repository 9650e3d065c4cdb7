//! PeriodicRunner (C6)
//!
//! Invokes an async callback on a fixed interval measured from the end of
//! one invocation to the start of the next.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationHandle;
use crate::delay::CancellableDelay;
use crate::error::{CoordinationError, CoordinationResult};
use crate::failure::FailureHook;

/// Periodically runs an async callback with `interval` between the end of
/// one run and the start of the next.
///
/// `start()` may be called exactly once. Parent cancellation during the
/// inter-run wait ends the loop immediately (or after the current run, if
/// busy); an initial delay also observes parent cancellation and, if the
/// parent fires first, the runner completes without ever invoking the
/// callback.
pub struct PeriodicRunner<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CoordinationResult<()>> + Send + 'static,
{
    callback: F,
    interval: Duration,
    parent: CancellationHandle,
    delay: CancellableDelay,
    started: AtomicBool,
    busy: AtomicBool,
    completed: AtomicBool,
    cancelled: AtomicBool,
    failure_hook: FailureHook,
}

impl<F, Fut> PeriodicRunner<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CoordinationResult<()>> + Send + 'static,
{
    /// Build a (not yet started) runner.
    pub fn new(callback: F, interval: Duration, parent: CancellationHandle) -> Arc<Self> {
        Arc::new(Self {
            callback,
            interval,
            delay: CancellableDelay::new(parent.clone()),
            parent,
            started: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            failure_hook: FailureHook::new(),
        })
    }

    /// Start the loop with no initial delay. Fails with `AlreadyStarted` on
    /// a second call.
    pub fn start(self: &Arc<Self>) -> CoordinationResult<()> {
        self.start_with(None)
    }

    /// Start the loop, waiting `initial_delay` before the first invocation.
    /// If the parent fires while that delay is outstanding, the runner
    /// transitions straight to `Completed` with zero invocations.
    pub fn start_after(self: &Arc<Self>, initial_delay: Duration) -> CoordinationResult<()> {
        self.start_with(Some(initial_delay))
    }

    fn start_with(self: &Arc<Self>, initial_delay: Option<Duration>) -> CoordinationResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(CoordinationError::AlreadyStarted);
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.run_loop(initial_delay).await;
        });
        Ok(())
    }

    async fn run_loop(self: Arc<Self>, initial_delay: Option<Duration>) {
        if let Some(initial_delay) = initial_delay {
            if self.delay.delay(initial_delay).await.is_err() || self.parent.is_cancelled() {
                self.mark_completed();
                return;
            }
        }

        loop {
            if self.parent.is_cancelled() {
                break;
            }

            self.busy.store(true, Ordering::Release);
            let result = (self.callback)().await;
            self.busy.store(false, Ordering::Release);

            if let Err(failure) = result {
                self.failure_hook.dispatch(failure);
            }

            if self.parent.is_cancelled() {
                break;
            }

            if self.delay.delay(self.interval).await.is_err() {
                break;
            }
        }

        self.mark_completed();
    }

    fn mark_completed(&self) {
        self.cancelled.store(self.parent.is_cancelled(), Ordering::Release);
        self.completed.store(true, Ordering::Release);
    }

    /// End the current inter-run wait early. Fails with `NotStarted` if
    /// called before `start`.
    pub fn wake(&self) -> CoordinationResult<()> {
        if !self.started.load(Ordering::Acquire) {
            return Err(CoordinationError::NotStarted);
        }
        self.delay.cancel();
        Ok(())
    }

    /// Install (or replace) the unhandled-failure hook.
    pub fn on_unhandled_failure<H>(&self, handler: H)
    where
        H: Fn(&CoordinationError) -> bool + Send + Sync + 'static,
    {
        self.failure_hook.set(handler);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Started and not yet completed.
    pub fn is_active(&self) -> bool {
        self.is_started() && !self.is_completed()
    }
}
