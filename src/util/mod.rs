//! Shared utilities: clocks/deadlines, (de)hydration wire helpers, and
//! telemetry setup.

/// Deadlines and timeout arithmetic shared by every blocking wait.
pub mod clock;
/// Wire-format helpers for the dehydration envelope.
pub mod serde;
/// Structured logging setup.
pub mod telemetry;

pub use clock::*;
pub use serde::*;
pub use telemetry::*;
