//! Error types for the coordination primitives

use thiserror::Error;

/// Result type for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Error taxonomy for the coordination primitives.
///
/// Structural errors (bad constructor argument, lifecycle misuse) are fatal
/// to the caller. `Cancelled` surfaces only when the *parent* handle fired;
/// a delay waking because of its own `cancel()` is swallowed, never
/// surfaced as this variant. `CallbackFailure` is offered to a primitive's
/// unhandled-failure hook before it is dropped.
#[derive(Error, Debug)]
pub enum CoordinationError {
    /// A constructor argument was out of range (negative duration,
    /// `max_workers < 1`, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `PeriodicRunner::start` was called a second time.
    #[error("already started")]
    AlreadyStarted,

    /// `PeriodicRunner::wake` was called before `start`.
    #[error("not started")]
    NotStarted,

    /// The parent cancellation handle fired while the caller was waiting.
    #[error("cancelled")]
    Cancelled,

    /// A callback raised an error that was not claimed by the
    /// unhandled-failure hook.
    #[error("callback failed: {0}")]
    CallbackFailure(String),
}
