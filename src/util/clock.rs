//! Wall-clock helpers used to budget finite timeouts across retry loops.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Used for log correlation and dehydrated
/// error timestamps; never used for timeout math (see [`Deadline`]).
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Tracks the time remaining in a finite timeout across a multi-step retry
/// loop (lock contention, condvar re-wait, pool retry backoff, ...).
///
/// `None` represents "no timeout" (block indefinitely); callers must treat
/// `None` specially rather than passing it through arithmetic, matching the
/// "finite-only decrement" rule used by every wait loop in this crate.
#[derive(Debug, Clone, Copy)]
pub enum Deadline {
    /// Block forever.
    Forever,
    /// Expires at the given instant.
    At(Instant),
}

impl Deadline {
    /// Build a deadline from an optional timeout measured from now.
    #[must_use]
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        match timeout {
            None => Self::Forever,
            Some(d) => Self::At(Instant::now() + d),
        }
    }

    /// Remaining duration, or `None` if this deadline never expires.
    ///
    /// Returns `Some(Duration::ZERO)` once expired rather than clamping to a
    /// negative value, so callers can distinguish "still has a zero-length
    /// window" from "unbounded".
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::Forever => None,
            Self::At(at) => Some(at.saturating_duration_since(Instant::now())),
        }
    }

    /// Whether this deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forever_never_expires() {
        let d = Deadline::from_timeout(None);
        assert!(d.remaining().is_none());
        assert!(!d.is_expired());
    }

    #[test]
    fn finite_deadline_counts_down() {
        let d = Deadline::from_timeout(Some(Duration::from_millis(50)));
        assert!(d.remaining().unwrap() <= Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(60));
        assert!(d.is_expired());
    }

    #[test]
    fn now_ms_is_monotonic_increasing_enough() {
        let a = now_ms();
        std::thread::sleep(Duration::from_millis(5));
        let b = now_ms();
        assert!(b >= a);
    }
}
