//! # Parking Lot Workers
//!
//! A shared-memory worker-thread protocol: dedicated OS threads, each
//! driving its own single-threaded async runtime, coordinated through
//! typed views over a common byte buffer instead of message copies.
//!
//! ## Core Problem Solved
//!
//! CPU-bound work needs to run off the main async runtime without losing
//! the ergonomics of request/response and shared state:
//!
//! - **Dedicated execution**: each worker owns an OS thread and a
//!   single-threaded Tokio runtime, so its work never blocks the caller's.
//! - **Shared memory, not copies**: [`memory::SharedMemory`] plus typed
//!   [`address::Address`] views give workers a futex-style wait/notify
//!   surface instead of round-tripping every value through a channel.
//! - **Composable sync primitives**: [`sync`] provides a mutex, condition
//!   variable, wait group, barrier, and semaphore, all allocated on shared
//!   memory and safe to hand across the worker boundary by (de)hydrating
//!   them through [`hydrate`].
//! - **Pooled dispatch**: [`pool::ThreadPool`] routes work across a bounded
//!   set of workers, growing and shrinking between `min_threads` and
//!   `max_threads`.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use parking_lot_workers::thread::{SpawnOptions, Thread};
//! use parking_lot_workers::worker::WorkerHandlers;
//! use async_trait::async_trait;
//! use serde_json::Value;
//!
//! struct Square;
//!
//! #[async_trait]
//! impl WorkerHandlers for Square {
//!     async fn onwork(&mut self, payload: Value) -> parking_lot_workers::error::Result<Value> {
//!         let n = payload.as_f64().unwrap_or(0.0);
//!         Ok(serde_json::json!(n * n))
//!     }
//! }
//!
//! # async fn run() -> parking_lot_workers::error::Result<()> {
//! let worker = Thread::spawn(Square, SpawnOptions::default()).await?;
//! let result = worker.send_work(serde_json::json!(7)).await?;
//! assert_eq!(result, serde_json::json!(49.0));
//! worker.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! For complete examples, see `tests/`.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Crate-wide error and result types.
pub mod error;
/// Shared memory buffers and the futex-style wait/notify substrate.
pub mod memory;
/// Typed, bounds-checked views over shared memory with an `Atomics`-like
/// operation surface.
pub mod address;
/// (De)hydration: carrying live primitives and extension types across
/// the worker boundary inside JSON payloads.
pub mod hydrate;
/// Shared-memory synchronization primitives: mutex, condition variable,
/// wait group, barrier, semaphore.
pub mod sync;
/// Envelope types carried between a parent `Thread` and its worker.
pub mod protocol;
/// The worker-side dispatch loop and handler traits.
pub mod worker;
/// The parent-side driver for a single worker thread.
pub mod thread;
/// A pool of worker threads behind a scheduling strategy.
pub mod pool;
/// Configuration models for worker pools.
pub mod config;
/// Shared utilities: clocks/deadlines, (de)hydration wire helpers, and
/// telemetry setup.
pub mod util;
