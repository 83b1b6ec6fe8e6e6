//! Declarative, serializable configuration for a [`crate::pool::ThreadPool`],
//! validated before being turned into live [`crate::pool::PoolOptions`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serializable mirror of [`crate::pool::PoolOptions`]'s sizing and retry
/// knobs (the strategy and callbacks stay code-only since they carry
/// closures/trait objects that don't round-trip through JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on live worker threads. `None` means `num_cpus::get()`,
    /// matching `PoolOptions::default`.
    pub max_threads: Option<usize>,
    /// Worker threads kept alive even while idle. Defaults to
    /// `max_threads` when unset.
    pub min_threads: Option<usize>,
    /// Milliseconds a thread above `min_threads` waits idle before
    /// closing itself. `None` disables idle-close.
    pub close_thread_when_idle_ms: Option<u64>,
    /// Attempts `send_work` makes before giving up.
    pub queue_retries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_threads: None,
            min_threads: None,
            close_thread_when_idle_ms: None,
            queue_retries: 5,
        }
    }
}

impl PoolConfig {
    /// Validate configured values, returning the resolved
    /// `(max_threads, min_threads)` pair on success.
    pub fn validate(&self) -> Result<(usize, usize), String> {
        let max_threads = self.max_threads.unwrap_or_else(num_cpus::get);
        if max_threads == 0 {
            return Err("max_threads must be greater than 0".into());
        }
        let min_threads = self.min_threads.unwrap_or(max_threads);
        if min_threads > max_threads {
            return Err(format!(
                "min_threads ({min_threads}) must not exceed max_threads ({max_threads})"
            ));
        }
        if self.queue_retries == 0 {
            return Err("queue_retries must be greater than 0".into());
        }
        Ok((max_threads, min_threads))
    }

    /// The configured idle-close timeout, if any.
    #[must_use]
    pub fn close_thread_when_idle(&self) -> Option<Duration> {
        self.close_thread_when_idle_ms.map(Duration::from_millis)
    }

    /// Parse and validate a `PoolConfig` from a JSON string.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
