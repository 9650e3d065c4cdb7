//! AsyncMutex (C3)
//!
//! A FIFO asynchronous mutex: `acquire()` suspends only if the mutex is
//! currently held, and releasing hands ownership straight to the head of
//! the waiter queue rather than waking everyone to race for it.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::oneshot;

struct State {
    /// True only when the waiter queue is empty.
    signalled: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// A mutual-exclusion primitive with FIFO wakeup order and no missed
/// signals.
///
/// Must be held behind an `Arc` so that the [`AsyncMutexGuard`] returned by
/// [`acquire`](AsyncMutex::acquire) can release itself independently of the
/// caller's own borrow.
pub struct AsyncMutex {
    state: SyncMutex<State>,
}

impl AsyncMutex {
    /// Build an unlocked mutex.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: SyncMutex::new(State {
                signalled: true,
                waiters: VecDeque::new(),
            }),
        })
    }

    /// Acquire the mutex, suspending only if it is currently held.
    ///
    /// Returns a guard that releases on `drop` (or on an explicit call to
    /// [`AsyncMutexGuard::release`], idempotently).
    pub async fn acquire(self: &Arc<Self>) -> AsyncMutexGuard {
        let pending = {
            let mut state = self.state.lock();
            if state.signalled {
                state.signalled = false;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };

        if let Some(rx) = pending {
            // The sender side is only ever dropped after sending, by
            // `release_inner` below, so this can't fail in practice.
            let _ = rx.await;
        }

        tracing::trace!("mutex acquired");
        AsyncMutexGuard {
            mutex: self.clone(),
            released: Cell::new(false),
        }
    }

    fn release_inner(&self) {
        let mut state = self.state.lock();
        if let Some(next) = state.waiters.pop_front() {
            drop(state);
            // Handing a fresh release capability to the head of the queue:
            // `signalled` stays false, ownership passes directly to them.
            let _ = next.send(());
        } else {
            state.signalled = true;
        }
    }
}

/// A single-use release capability for an [`AsyncMutex`] acquisition.
///
/// Dropping the guard releases the mutex. Calling [`release`](Self::release)
/// explicitly is equivalent and safe to call more than once: a repeat
/// release is a no-op, not a panic.
pub struct AsyncMutexGuard {
    mutex: Arc<AsyncMutex>,
    released: Cell<bool>,
}

impl AsyncMutexGuard {
    /// Release the mutex. Idempotent: calling this more than once (or
    /// letting `drop` call it again) has no further effect.
    pub fn release(&self) {
        if !self.released.replace(true) {
            self.mutex.release_inner();
        }
    }
}

impl Drop for AsyncMutexGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn uncontended_acquire_does_not_suspend() {
        let mutex = AsyncMutex::new();
        let guard = mutex.acquire().await;
        drop(guard);
    }

    #[tokio::test]
    async fn second_acquire_waits_for_release() {
        let mutex = AsyncMutex::new();
        let first = mutex.acquire().await;

        let waiter_mutex = mutex.clone();
        let waiter = tokio::spawn(async move {
            let _second = waiter_mutex.acquire().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter should be released")
            .unwrap();
    }

    #[tokio::test]
    async fn double_release_is_a_no_op() {
        let mutex = AsyncMutex::new();
        let guard = mutex.acquire().await;
        guard.release();
        guard.release();

        // Mutex should be free exactly once, not corrupted into some
        // double-signalled state.
        let second = mutex.acquire().await;
        drop(second);
    }

    #[tokio::test]
    async fn scenario_s4_sixteen_tasks_rotate_a_shared_identifier() {
        // 16 tasks each rotate one distinct byte of a shared 16-byte value
        // 25_600 times under the mutex; since rotating a byte left by 1,
        // 256 times, is the identity, and 25_600 is a multiple of 256,
        // the final value equals the initial value.
        let mutex = AsyncMutex::new();
        let shared: Arc<[AtomicU8; 16]> = Arc::new(std::array::from_fn(|i| AtomicU8::new(i as u8)));

        let mut tasks = Vec::new();
        for i in 0..16usize {
            let mutex = mutex.clone();
            let shared = shared.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..25_600 {
                    let guard = mutex.acquire().await;
                    let value = shared[i].load(Ordering::Relaxed);
                    shared[i].store(value.rotate_left(1), Ordering::Relaxed);
                    drop(guard);
                }
            }));
        }

        for t in tasks {
            t.await.unwrap();
        }

        for i in 0..16usize {
            assert_eq!(shared[i].load(Ordering::Relaxed), i as u8);
        }
    }

    #[tokio::test]
    async fn waiters_are_released_in_fifo_order() {
        let mutex = AsyncMutex::new();
        let first = mutex.acquire().await;
        let order = Arc::new(SyncMutex::new(Vec::new()));

        let mut waiters = Vec::new();
        for i in 0..5 {
            let mutex = mutex.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                // Stagger enqueue order deterministically.
                tokio::time::sleep(Duration::from_millis(i as u64 * 5)).await;
                let guard = mutex.acquire().await;
                order.lock().push(i);
                drop(guard);
            }));
        }

        // Let every waiter enqueue before releasing the first holder.
        tokio::time::sleep(Duration::from_millis(40)).await;
        drop(first);

        for w in waiters {
            w.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }
}
