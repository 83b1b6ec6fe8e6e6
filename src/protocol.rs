//! The envelope types carried over the in-process channel connecting a
//! parent [`crate::thread::Thread`] to its worker OS thread.
//!
//! Unlike the browser `postMessage` model this is distilled from, worker
//! and parent share an address space, so envelopes are plain Rust values
//! passed through `crossbeam_channel` rather than bytes. The one boundary
//! that still needs explicit (de)hydration is every `serde_json::Value`
//! payload inside an envelope, since those are where user-supplied
//! primitive instances (`Mutex`, `Address`, ...) live.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::memory::SharedMemory;

/// A dehydrated error, carried in place of a live `Error` across the
/// channel boundary so it can be logged, matched on, and re-thrown by
/// whichever side receives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    /// Name of the originating error kind.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Best-effort captured stack trace, empty if unavailable.
    pub stack: String,
    /// Chained cause, if any.
    pub cause: Option<Box<WireError>>,
}

impl WireError {
    /// Wrap a message under a given error-kind name with no stack/cause.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: String::new(),
            cause: None,
        }
    }
}

impl From<&crate::error::Error> for WireError {
    fn from(e: &crate::error::Error) -> Self {
        if let crate::error::Error::WorkerError { name, message, stack, cause } = e {
            return Self {
                name: name.clone(),
                message: message.clone(),
                stack: stack.clone(),
                cause: cause.as_ref().map(|c| Box::new(Self::from(c.as_ref()))),
            };
        }
        Self::new(error_kind_name(e), e.to_string())
    }
}

impl From<WireError> for crate::error::Error {
    fn from(w: WireError) -> Self {
        Self::WorkerError {
            name: w.name,
            message: w.message,
            stack: w.stack,
            cause: w.cause.map(|c| Box::new(Self::from(*c))),
        }
    }
}

fn error_kind_name(e: &crate::error::Error) -> &'static str {
    use crate::error::Error as E;
    match e {
        E::InvalidOperation(_) => "InvalidOperation",
        E::OutOfBounds(_) => "OutOfBounds",
        E::InvalidLayout(_) => "InvalidLayout",
        E::InvalidRegistration(_) => "InvalidRegistration",
        E::InitializationFailed(_) => "InitializationFailed",
        E::ThreadStopped(_) => "ThreadStopped",
        E::ShuttingDown(_) => "ShuttingDown",
        E::InvalidSystemEvent(_) => "InvalidSystemEvent",
        E::WorkerError { .. } => "WorkerError",
        E::PoolClosed => "PoolClosed",
        E::SchedulerExhausted(_) => "SchedulerExhausted",
        E::WaitNotSupported(_) => "WaitNotSupported",
        E::NotInWorker => "NotInWorker",
    }
}

/// One item moved through a `transfer` call. Mirrors the small set of
/// "transferable" kinds this crate knows about: a live shared buffer
/// (still reachable for future `Address` use) or an owned byte buffer.
#[derive(Debug)]
pub enum TransferItem {
    /// A shared memory handle, transferred by clone (the handle is still
    /// usable afterward by design, unlike an `ArrayBuffer` transfer, since
    /// Rust ownership already prevents the sender from holding onto a
    /// `Vec<u8>` it moved).
    Memory(SharedMemory),
    /// An owned byte buffer, moved out of the sender.
    Bytes(Vec<u8>),
}

/// A message exchanged between a parent `Thread` and its worker.
#[derive(Debug)]
pub enum Envelope {
    /// Sent once at spawn time.
    Init {
        /// Opaque initialization payload forwarded to `oninit`.
        init: Value,
        /// Idle-close timeout to arm once this worker goes idle.
        close_when_idle: Option<Duration>,
    },
    /// Worker's reply to `Init`.
    Initd(Result<(), WireError>),
    /// A unit of work dispatched to `onwork`.
    Work {
        /// Correlates with the matching `WorkResult`.
        id: Uuid,
        /// Opaque work payload.
        payload: Value,
    },
    /// Worker's reply to `Work`.
    WorkResult {
        /// Matches the originating `Work::id`.
        id: Uuid,
        /// Handler result.
        result: Result<Value, WireError>,
    },
    /// A fire-and-forget message dispatched to `onevent` (no reply).
    Event {
        /// Opaque event payload.
        payload: Value,
    },
    /// Share a resource with the worker via `onshare`.
    Share {
        /// Correlates with the matching `Shared`.
        id: Uuid,
        /// The shared item (dehydrated on the wire where needed).
        item: Value,
        /// Accompanying message.
        message: Value,
    },
    /// Worker's acknowledgment of a `Share`.
    Shared {
        /// Matches the originating `Share::id`.
        id: Uuid,
        /// Handler result.
        result: Result<(), WireError>,
    },
    /// Transfer ownership of items to the worker (parent-initiated), or an
    /// unsolicited transfer back to the parent (worker-initiated, in which
    /// case `id` is `None` and no reply is expected).
    Transfer {
        /// Present only for a parent-initiated transfer awaiting an ack.
        id: Option<Uuid>,
        /// Accompanying message.
        message: Value,
        /// The transferred items.
        items: Vec<TransferItem>,
    },
    /// Worker's acknowledgment of a parent-initiated `Transfer`.
    Transferd {
        /// Matches the originating `Transfer::id`.
        id: Uuid,
        /// Handler result.
        result: Result<(), WireError>,
    },
    /// Ask the worker to close gracefully.
    Close,
    /// Worker's notification that it has finished closing gracefully.
    ClosedGracefully,
    /// An error the worker could not attribute to a specific pending
    /// request.
    UnhandledError(WireError),
}
