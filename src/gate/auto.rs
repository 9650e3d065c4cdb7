//! AutoGate (C5): an auto-reset event.
//!
//! `set()` releases exactly one waiter, FIFO; if none is waiting, the gate
//! becomes signalled and the next `wait()` passes straight through, then
//! re-closes.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;

struct State {
    signalled: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// An auto-reset event: at most one of "signalled" or "a non-empty waiter
/// queue" holds at any moment.
pub struct AutoGate {
    state: Mutex<State>,
}

impl AutoGate {
    /// Build a gate, open or closed as given.
    pub fn new(initial_open: bool) -> Self {
        Self {
            state: Mutex::new(State {
                signalled: initial_open,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Suspend until the next `set()`, or pass through immediately if the
    /// gate is already signalled (consuming the signal).
    pub async fn wait(&self) {
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
            let _ = rx.await;
        }
    }

    /// Release exactly one waiter (FIFO), or become signalled if none is
    /// waiting.
    pub fn set(&self) {
        let mut state = self.state.lock();
        if let Some(next) = state.waiters.pop_front() {
            drop(state);
            let _ = next.send(());
        } else {
            state.signalled = true;
        }
    }

    /// Non-suspending poll of the signalled flag. A best-effort hint, not a
    /// synchronization point.
    pub fn is_signalled(&self) -> bool {
        self.state.lock().signalled
    }
}

impl Default for AutoGate {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn set_releases_only_one_waiter_at_a_time() {
        let gate = Arc::new(AutoGate::new(false));
        let completed = Arc::new(AtomicUsize::new(0));

        let mut waiters = Vec::new();
        for _ in 0..5 {
            let gate = gate.clone();
            let completed = completed.clone();
            waiters.push(tokio::spawn(async move {
                gate.wait().await;
                completed.fetch_add(1, Ordering::SeqCst);
            }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);

        gate.set();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        gate.set();
        gate.set();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 3);

        for w in waiters {
            w.abort();
        }
    }

    #[tokio::test]
    async fn scenario_property10_m_of_n_waiters_complete() {
        let gate = Arc::new(AutoGate::new(false));
        let completed = Arc::new(AtomicUsize::new(0));
        const N: usize = 10;
        const M: usize = 4;

        let mut waiters = Vec::new();
        for _ in 0..N {
            let gate = gate.clone();
            let completed = completed.clone();
            waiters.push(tokio::spawn(async move {
                gate.wait().await;
                completed.fetch_add(1, Ordering::SeqCst);
            }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        for _ in 0..M {
            gate.set();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(completed.load(Ordering::SeqCst), M);

        for w in waiters {
            w.abort();
        }
    }

    #[tokio::test]
    async fn set_with_no_waiters_makes_next_wait_pass_through() {
        let gate = AutoGate::new(false);
        gate.set();
        assert!(gate.is_signalled());
        tokio::time::timeout(Duration::from_millis(20), gate.wait())
            .await
            .unwrap();
        assert!(!gate.is_signalled());
    }
}
