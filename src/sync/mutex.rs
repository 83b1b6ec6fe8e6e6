//! Shared-memory mutex: the three-state futex algorithm
//! (`UNLOCKED`/`LOCKED`/`CONTENDED`).

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::Result;
use crate::memory::{try_alloc, ElementTag, LayoutItem, WaitResult};
use crate::util::clock::Deadline;

const UNLOCKED: i32 = 0;
const LOCKED: i32 = 1;
const CONTENDED: i32 = 2;

/// Dehydration key for [`Mutex`].
pub const HYDRATION_KEY: &str = "sync::mutex";

/// The memory layout backing a `Mutex`: one `i32` state word.
pub const ELEMENT_LAYOUT: &[LayoutItem] = &[LayoutItem {
    tag: ElementTag::I32,
    count: 1,
}];

/// A mutual-exclusion lock living in shared memory, usable from any thread
/// holding a clone of its handle.
///
/// Not fair: under contention, whichever waiter's spurious wakeup lands
/// first wins the race for the lock, not FIFO order.
#[derive(Clone, Debug)]
pub struct Mutex {
    state: Address<i32>,
}

impl Mutex {
    /// Allocate a new, unlocked mutex.
    pub fn make() -> Result<Self> {
        let (mem, offsets) = try_alloc(ELEMENT_LAYOUT)?;
        let (offset, count) = offsets[0];
        Ok(Self {
            state: Address::new(mem, offset, count)?,
        })
    }

    fn key(&self) -> (u64, usize) {
        let (handle, offset, _) = self.state.raw_parts();
        (handle, offset)
    }

    /// Attempt to acquire the lock without blocking.
    pub fn try_lock(&self) -> Result<bool> {
        let prev = self.state.compare_exchange(0, UNLOCKED, LOCKED)?;
        if prev == UNLOCKED {
            super::held::mark(self.key());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Acquire the lock, blocking the current thread. Returns `false` on
    /// timeout.
    pub fn lock(&self, timeout: Option<Duration>) -> Result<bool> {
        if self.try_lock()? {
            return Ok(true);
        }
        let deadline = Deadline::from_timeout(timeout);
        loop {
            // Publish contention: whoever holds the lock now owes a
            // notify on unlock, whether or not we end up being the one
            // who observes UNLOCKED here.
            let prev = self.state.exchange(0, CONTENDED)?;
            if prev == UNLOCKED {
                super::held::mark(self.key());
                return Ok(true);
            }
            if deadline.is_expired() {
                return Ok(false);
            }
            if self.state.wait(0, CONTENDED, deadline.remaining())? == WaitResult::TimedOut {
                return Ok(false);
            }
        }
    }

    /// Future-returning variant of [`Mutex::lock`].
    pub fn lock_async(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<bool>> + Send + 'static {
        let this = self.clone();
        async move { tokio::task::spawn_blocking(move || this.lock(timeout)).await.unwrap() }
    }

    /// Release the lock. If other threads were contending, wakes one.
    pub fn unlock(&self) -> Result<()> {
        let prev = self.state.fetch_sub(0, 1)?;
        if prev != LOCKED {
            self.state.store(0, UNLOCKED)?;
            self.state.notify_one(0)?;
        }
        super::held::unmark(self.key());
        Ok(())
    }

    /// Whether the calling thread currently holds this lock (thread-local
    /// bookkeeping; never transported across the worker boundary).
    #[must_use]
    pub fn has_lock(&self) -> bool {
        super::held::contains(self.key())
    }
}

impl Serialize for Mutex {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[derive(Serialize)]
        struct Wire<'a> {
            addr: &'a Address<i32>,
        }
        crate::util::serde::DehydratedForm::new(
            HYDRATION_KEY,
            serde_json::to_value(Wire { addr: &self.state }).map_err(serde::ser::Error::custom)?,
        )
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Mutex {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wire {
            addr: Address<i32>,
        }
        let form = crate::util::serde::DehydratedForm::deserialize(deserializer)?;
        let wire: Wire = serde_json::from_value(form.value).map_err(serde::de::Error::custom)?;
        Ok(Self { state: wire.addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn uncontended_lock_unlock() {
        let m = Mutex::make().unwrap();
        assert!(m.lock(None).unwrap());
        assert!(m.has_lock());
        m.unlock().unwrap();
        assert!(!m.has_lock());
    }

    #[test]
    fn try_lock_fails_when_held() {
        let m = Mutex::make().unwrap();
        assert!(m.try_lock().unwrap());
        assert!(!m.try_lock().unwrap());
    }

    #[test]
    fn mutual_exclusion_under_contention() {
        let m = Arc::new(Mutex::make().unwrap());
        let counter = Arc::new(std::sync::atomic::AtomicI64::new(0));
        let mut handles = vec![];
        for _ in 0..4 {
            let m = Arc::clone(&m);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..300 {
                    assert!(m.lock(Some(Duration::from_secs(5))).unwrap());
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    m.unlock().unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1200);
    }

    #[test]
    fn lock_times_out_when_held() {
        let m = Mutex::make().unwrap();
        assert!(m.lock(None).unwrap());
        let m2 = m.clone();
        let handle = thread::spawn(move || m2.lock(Some(Duration::from_millis(30))).unwrap());
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn dehydrate_hydrate_round_trip_shares_state() {
        let m = Mutex::make().unwrap();
        let v = serde_json::to_value(&m).unwrap();
        let m2: Mutex = serde_json::from_value(v).unwrap();
        assert!(m2.lock(None).unwrap());
        assert!(!m.try_lock().unwrap());
    }
}
