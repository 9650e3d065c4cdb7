//! Asynchronous coordination primitives: cancellable delays, a time-bounded
//! exclusive lock, FIFO mutual exclusion and event primitives, a periodic
//! runner, a coalescing deferred executor, and a bounded-parallelism worker
//! pool, built on `tokio` as the host scheduler.
//!
//! None of these primitives manage threads themselves; every suspending
//! operation is a `tokio` future, and cancellation is cooperative throughout
//! (see [`cancellation`]).

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod cancellation;
pub mod clock;
pub mod coalescing;
pub mod delay;
pub mod error;
pub mod failure;
pub mod gate;
pub mod mutex;
pub mod periodic;
pub mod pool;
pub mod time_lock;

pub use cancellation::{CancellationHandle, LinkedCancellation};
pub use coalescing::CoalescingJob;
pub use delay::CancellableDelay;
pub use error::{CoordinationError, CoordinationResult};
pub use failure::FailureHook;
pub use gate::{AutoGate, ManualGate};
pub use mutex::{AsyncMutex, AsyncMutexGuard};
pub use periodic::PeriodicRunner;
pub use pool::{BoundedWorkerPool, ItemHandler};
pub use time_lock::TimeLock;
