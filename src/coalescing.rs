//! CoalescingJob (C7): the hardest subsystem.
//!
//! A single atomic 64-bit schedule slot encodes four logical states: idle,
//! scheduled-at-tick-T, running, and running-with-pending-reschedule.
//! `wake()` and `delay(d)` merge concurrently into that one slot under
//! compare-and-swap; a background task drains it, executing the callback at
//! most once per dispatch.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::cancellation::CancellationHandle;
use crate::clock;
use crate::delay::CancellableDelay;
use crate::error::{CoordinationError, CoordinationResult};
use crate::failure::FailureHook;

const IDLE: i64 = 0;
const RUN_IMMEDIATE: i64 = i64::MAX - 2;
const RUNNING_RESCHEDULE: i64 = i64::MAX - 1;
const RUNNING: i64 = i64::MAX;

enum RunEntry {
    Proceed,
    SpuriousWake,
    DuplicateDispatch,
    Idle,
}

/// A coalescing deferred executor: many `wake()`/`delay()` requests merge
/// into at most one pending dispatch.
pub struct CoalescingJob<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CoordinationResult<()>> + Send + 'static,
{
    callback: F,
    interval: Duration,
    parent: CancellationHandle,
    slot: AtomicI64,
    delay_source: CancellableDelay,
    /// Wakes the background loop out of an idle wait; `delay_source.cancel()`
    /// handles waking it out of a scheduled wait.
    rescan: Notify,
    busy: AtomicBool,
    completed: AtomicBool,
    cancelled: AtomicBool,
    failure_hook: FailureHook,
}

impl<F, Fut> CoalescingJob<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CoordinationResult<()>> + Send + 'static,
{
    /// Build a job and start its background driver. The job is idle until
    /// the first `wake()`/`delay()`.
    pub fn new(callback: F, interval: Duration, parent: CancellationHandle) -> Arc<Self> {
        let this = Arc::new(Self {
            callback,
            interval,
            delay_source: CancellableDelay::new(parent.clone()),
            parent,
            slot: AtomicI64::new(IDLE),
            rescan: Notify::new(),
            busy: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            failure_hook: FailureHook::new(),
        });
        let driver = this.clone();
        tokio::spawn(async move { driver.drive().await });
        this
    }

    /// Request an immediate run, pre-empting any pending schedule.
    pub fn wake(&self) {
        if self.parent.is_cancelled() {
            return;
        }
        loop {
            let cur = self.slot.load(Ordering::Acquire);
            match cur {
                RUN_IMMEDIATE | RUNNING_RESCHEDULE => return,
                RUNNING => {
                    if self
                        .slot
                        .compare_exchange(cur, RUNNING_RESCHEDULE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                _idle_or_scheduled => {
                    if self
                        .slot
                        .compare_exchange(cur, RUN_IMMEDIATE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.wake_background();
                        return;
                    }
                }
            }
        }
    }

    /// Request a run no earlier than `interval` from now.
    pub fn delay(&self) {
        self.delay_for(self.interval);
    }

    /// Request a run no earlier than `d` from now.
    pub fn delay_for(&self, d: Duration) {
        if self.parent.is_cancelled() {
            return;
        }
        let new_t = clock::now_ticks() + clock::ticks(d);
        loop {
            let cur = self.slot.load(Ordering::Acquire);
            match cur {
                RUN_IMMEDIATE | RUNNING_RESCHEDULE => return,
                RUNNING => {
                    if self
                        .slot
                        .compare_exchange(cur, RUNNING_RESCHEDULE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                IDLE => {
                    if self
                        .slot
                        .compare_exchange(cur, new_t, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.wake_background();
                        return;
                    }
                }
                scheduled_t => {
                    if scheduled_t > new_t {
                        // The already-scheduled, earlier-issued request already
                        // satisfies "no earlier than new_t"; leave it alone.
                        return;
                    }
                    if self
                        .slot
                        .compare_exchange(cur, new_t, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.wake_background();
                        return;
                    }
                }
            }
        }
    }

    fn wake_background(&self) {
        self.delay_source.cancel();
        self.rescan.notify_one();
    }

    async fn drive(self: Arc<Self>) {
        loop {
            if self.parent.is_cancelled() {
                break;
            }

            let state = self.slot.load(Ordering::Acquire);
            match state {
                IDLE => {
                    let notified = self.rescan.notified();
                    tokio::pin!(notified);
                    if self.slot.load(Ordering::Acquire) != IDLE {
                        continue;
                    }
                    tokio::select! {
                        _ = &mut notified => continue,
                        _ = self.parent.cancelled() => break,
                    }
                }
                RUN_IMMEDIATE => {
                    self.try_run().await;
                }
                RUNNING | RUNNING_RESCHEDULE => {
                    // The dispatching task owns this transition; yield and
                    // re-read rather than spin.
                    tokio::task::yield_now().await;
                }
                scheduled_t => {
                    let now = clock::now_ticks();
                    if scheduled_t <= now {
                        self.try_run().await;
                    } else {
                        let remaining = Duration::from_micros((scheduled_t - now) as u64);
                        if self.delay_source.delay(remaining).await.is_err() {
                            break;
                        }
                        // Either the timer elapsed or a concurrent request
                        // rescheduled us; re-read the slot either way.
                    }
                }
            }
        }
        self.mark_completed();
    }

    fn try_enter_run_state(&self) -> RunEntry {
        loop {
            let cur = self.slot.load(Ordering::Acquire);
            match cur {
                RUNNING | RUNNING_RESCHEDULE => {
                    tracing::warn!(state = cur, "duplicate CoalescingJob dispatch observed");
                    return RunEntry::DuplicateDispatch;
                }
                IDLE => return RunEntry::Idle,
                RUN_IMMEDIATE => {
                    if self
                        .slot
                        .compare_exchange(cur, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return RunEntry::Proceed;
                    }
                }
                scheduled_t => {
                    let now = clock::now_ticks();
                    if scheduled_t > now {
                        return RunEntry::SpuriousWake;
                    }
                    if self
                        .slot
                        .compare_exchange(cur, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return RunEntry::Proceed;
                    }
                }
            }
        }
    }

    /// Returns `true` if a reschedule is owed after this run.
    fn exit_run_state(&self) -> bool {
        loop {
            let cur = self.slot.load(Ordering::Acquire);
            match cur {
                RUNNING => {
                    if self
                        .slot
                        .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return false;
                    }
                }
                RUNNING_RESCHEDULE => {
                    if self
                        .slot
                        .compare_exchange(RUNNING_RESCHEDULE, IDLE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return true;
                    }
                }
                _ => return false,
            }
        }
    }

    async fn try_run(self: &Arc<Self>) {
        match self.try_enter_run_state() {
            RunEntry::Idle | RunEntry::SpuriousWake | RunEntry::DuplicateDispatch => {}
            RunEntry::Proceed => {
                self.busy.store(true, Ordering::Release);
                let result = (self.callback)().await;
                self.busy.store(false, Ordering::Release);

                if let Err(failure) = result {
                    self.failure_hook.dispatch(failure);
                }

                if self.exit_run_state() {
                    self.delay_for(self.interval);
                }
            }
        }
    }

    fn mark_completed(&self) {
        self.cancelled.store(self.parent.is_cancelled(), Ordering::Release);
        self.completed.store(true, Ordering::Release);
    }

    /// Install (or replace) the unhandled-failure hook.
    pub fn on_unhandled_failure<H>(&self, handler: H)
    where
        H: Fn(&CoordinationError) -> bool + Send + Sync + 'static,
    {
        self.failure_hook.set(handler);
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[tokio::test]
    async fn property6_many_delay_calls_within_a_window_coalesce_to_one_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let parent = CancellationHandle::new();
        let job = {
            let count = count.clone();
            CoalescingJob::new(
                move || {
                    let count = count.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                Duration::from_millis(50),
                parent.clone(),
            )
        };

        let start = Instant::now();
        for _ in 0..1000 {
            job.delay();
        }
        let elapsed_issuing = start.elapsed();
        assert!(elapsed_issuing < Duration::from_millis(30));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        parent.cancel();
    }

    #[tokio::test]
    async fn property7_wake_preempts_a_pending_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let parent = CancellationHandle::new();
        let job = {
            let count = count.clone();
            CoalescingJob::new(
                move || {
                    let count = count.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                Duration::from_secs(5),
                parent.clone(),
            )
        };

        job.delay();
        let start = Instant::now();
        job.wake();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(200));
        parent.cancel();
    }

    #[tokio::test]
    async fn property8_wake_during_run_causes_exactly_one_further_invocation() {
        let count = Arc::new(AtomicUsize::new(0));
        let parent = CancellationHandle::new();
        let job = {
            let count = count.clone();
            CoalescingJob::new(
                move || {
                    let count = count.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(60)).await;
                        Ok(())
                    }
                },
                Duration::from_millis(10),
                parent.clone(),
            )
        };

        job.wake();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(job.is_busy());

        job.wake();
        job.wake();
        job.wake();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        parent.cancel();
    }

    #[tokio::test]
    async fn scenario_s5_one_thousand_delay_calls_yield_one_run_near_the_window() {
        let count = Arc::new(AtomicUsize::new(0));
        let parent = CancellationHandle::new();
        let job = {
            let count = count.clone();
            CoalescingJob::new(
                move || {
                    let count = count.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                Duration::from_millis(50),
                parent.clone(),
            )
        };

        let start = Instant::now();
        for _ in 0..1000 {
            job.delay();
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        parent.cancel();
    }

    #[tokio::test]
    async fn parent_cancellation_stops_future_requests() {
        let count = Arc::new(AtomicUsize::new(0));
        let parent = CancellationHandle::new();
        let job = {
            let count = count.clone();
            CoalescingJob::new(
                move || {
                    let count = count.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                Duration::from_millis(10),
                parent.clone(),
            )
        };

        parent.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        job.wake();
        job.delay();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(job.is_completed());
    }
}
