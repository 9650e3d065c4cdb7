//! BoundedWorkerPool (C8)
//!
//! Drains a concurrent FIFO with up to `max_workers` concurrent workers,
//! capping `in_flight` via a compare-then-increment "prod" that can never
//! overshoot the configured maximum.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam::queue::SegQueue;

use crate::cancellation::CancellationHandle;
use crate::error::{CoordinationError, CoordinationResult};
use crate::failure::FailureHook;

/// A per-item handler. Implemented automatically for any
/// `Fn(T) -> impl Future<Output = CoordinationResult<()>>` closure, mirroring
/// the `Runnable` callback seam the pool grew out of.
#[async_trait]
pub trait ItemHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle(&self, item: T) -> CoordinationResult<()>;
}

#[async_trait]
impl<T, F, Fut> ItemHandler<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CoordinationResult<()>> + Send + 'static,
{
    async fn handle(&self, item: T) -> CoordinationResult<()> {
        (self)(item).await
    }
}

/// A bounded-parallelism worker pool draining a concurrent FIFO.
pub struct BoundedWorkerPool<T, H>
where
    T: Send + 'static,
    H: ItemHandler<T>,
{
    handler: H,
    queue: SegQueue<T>,
    queue_len: AtomicUsize,
    in_flight: AtomicUsize,
    max_workers: usize,
    /// Inter-item pacing. Only produces a predictable global cadence when
    /// `max_workers == 1`; with more workers it still applies per-worker,
    /// but workers run concurrently so the aggregate rate isn't paced.
    interval: Option<Duration>,
    parent: CancellationHandle,
    failure_hook: FailureHook,
}

impl<T, H> BoundedWorkerPool<T, H>
where
    T: Send + 'static,
    H: ItemHandler<T>,
{
    /// Build a pool. Fails with `InvalidArgument` if `max_workers < 1`.
    pub fn new(
        handler: H,
        max_workers: usize,
        interval: Option<Duration>,
        parent: CancellationHandle,
    ) -> CoordinationResult<Arc<Self>> {
        if max_workers < 1 {
            return Err(CoordinationError::InvalidArgument(format!(
                "max_workers must be at least 1, got {max_workers}"
            )));
        }
        Ok(Arc::new(Self {
            handler,
            queue: SegQueue::new(),
            queue_len: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_workers,
            interval,
            parent,
            failure_hook: FailureHook::new(),
        }))
    }

    /// Enqueue a single item and prod the pool.
    pub fn enqueue(self: &Arc<Self>, item: T) {
        self.queue.push(item);
        self.queue_len.fetch_add(1, Ordering::AcqRel);
        self.prod();
    }

    /// Enqueue a batch of items and prod the pool once.
    pub fn enqueue_batch<I>(self: &Arc<Self>, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        let mut n = 0usize;
        for item in items {
            self.queue.push(item);
            n += 1;
        }
        self.queue_len.fetch_add(n, Ordering::AcqRel);
        self.prod();
    }

    fn prod(self: &Arc<Self>) {
        loop {
            if self.parent.is_cancelled() {
                return;
            }
            if self.queue_len.load(Ordering::Acquire) == 0 {
                return;
            }
            let observed = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
            if observed > self.max_workers {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                return;
            }
            let worker = self.clone();
            tokio::spawn(async move { worker.run_worker().await });
        }
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            if self.parent.is_cancelled() {
                break;
            }
            let item = match self.queue.pop() {
                Some(item) => {
                    self.queue_len.fetch_sub(1, Ordering::AcqRel);
                    item
                }
                None => break,
            };

            let result = self.handler.handle(item).await;
            if let Err(failure) = result {
                self.failure_hook.dispatch(failure);
            }

            if let Some(interval) = self.interval {
                tokio::time::sleep(interval).await;
            }
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.prod();
    }

    /// Install (or replace) the unhandled-failure hook.
    pub fn on_unhandled_failure<Handler>(&self, handler: Handler)
    where
        Handler: Fn(&CoordinationError) -> bool + Send + Sync + 'static,
    {
        self.failure_hook.set(handler);
    }

    /// Approximate count of items not yet dequeued by a worker.
    pub fn count(&self) -> usize {
        self.queue_len.load(Ordering::Acquire)
    }

    /// The current number of concurrently running workers. A best-effort
    /// observable, not a synchronization point.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Hasn't been cancelled via the parent handle.
    pub fn is_active(&self) -> bool {
        !self.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.parent.is_cancelled()
    }
}
