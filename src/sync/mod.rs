//! Shared-memory synchronization primitives: [`Mutex`], [`ConditionVariable`],
//! [`WaitGroup`], [`Barrier`], and [`Semaphore`].
//!
//! Each primitive is allocated on top of [`crate::memory`] via its own
//! `ELEMENT_LAYOUT`, dehydrates/hydrates transparently, and exposes both a
//! blocking and an async entry point for every wait-style operation.

/// Cyclic barrier.
pub mod barrier;
/// Condition variable, always paired with a [`Mutex`].
pub mod condvar;
/// Mutual-exclusion lock.
pub mod mutex;
/// Counting semaphore.
pub mod semaphore;
/// Countdown-style wait group.
pub mod waitgroup;

pub use barrier::Barrier;
pub use condvar::ConditionVariable;
pub use mutex::Mutex;
pub use semaphore::Semaphore;
pub use waitgroup::WaitGroup;

use std::cell::RefCell;
use std::collections::HashSet;

thread_local! {
    static HELD: RefCell<HashSet<(u64, usize)>> = RefCell::new(HashSet::new());
}

/// Thread-local bookkeeping shared by [`Mutex::has_lock`] and
/// [`Semaphore::has_acquired`]: these are convenience queries only, never
/// transported across the worker boundary, and never consulted by the
/// actual lock/acquire algorithms.
pub(crate) mod held {
    use super::HELD;

    pub(crate) fn mark(key: (u64, usize)) {
        HELD.with(|h| {
            h.borrow_mut().insert(key);
        });
    }

    pub(crate) fn unmark(key: (u64, usize)) {
        HELD.with(|h| {
            h.borrow_mut().remove(&key);
        });
    }

    pub(crate) fn contains(key: (u64, usize)) -> bool {
        HELD.with(|h| h.borrow().contains(&key))
    }
}
