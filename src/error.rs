//! Error types shared by the address/memory, sync-primitive, and worker layers.

use thiserror::Error;

/// Errors produced anywhere in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation was attempted in a context that does not support it
    /// (e.g. a blocking wait called from inside a worker's own dispatch loop).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// An `Address` was constructed, or indexed, outside the bounds of its
    /// backing `SharedMemory`.
    #[error("address out of bounds: {0}")]
    OutOfBounds(String),

    /// An `ELEMENT_LAYOUT` could not be honored, or an atomic operation was
    /// attempted on a non-integer element.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// A dehydration registry entry was malformed or collided with an
    /// existing key.
    #[error("invalid registration: {0}")]
    InvalidRegistration(String),

    /// A worker's `oninit` handler failed, or the worker thread could not
    /// be started.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// The target thread has already stopped (killed, crashed, or closed).
    #[error("thread stopped: {0}")]
    ThreadStopped(String),

    /// The target thread or pool is in the process of shutting down.
    #[error("shutting down: {0}")]
    ShuttingDown(String),

    /// An envelope arrived that the receiving side could not classify.
    #[error("invalid system event: {0}")]
    InvalidSystemEvent(String),

    /// A worker handler raised an error that propagated back to the parent.
    #[error("worker error: {name}: {message}")]
    WorkerError {
        /// Name of the original error (`name` field of a dehydrated error).
        name: String,
        /// Human-readable message.
        message: String,
        /// Best-effort captured stack, empty if unavailable.
        stack: String,
        /// Chained cause, dehydrated the same way.
        cause: Option<Box<Error>>,
    },

    /// A `ThreadPool` has been closed and no longer accepts work.
    #[error("pool closed")]
    PoolClosed,

    /// A `ThreadPool::send_work` call exhausted its retry budget.
    #[error("scheduler exhausted after {0} attempts")]
    SchedulerExhausted(u32),

    /// A wait operation is not supported on this `Address`'s element type.
    #[error("wait not supported: {0}")]
    WaitNotSupported(String),

    /// A worker-only API (e.g. `register_handler`) was called from a
    /// thread that is not currently running a worker dispatch loop.
    #[error("not running inside a worker")]
    NotInWorker,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
