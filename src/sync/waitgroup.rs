//! Shared-memory wait group: an atomic counter that `wait` blocks on until
//! it reaches zero.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::memory::{try_alloc, ElementTag, LayoutItem, WaitResult};
use crate::util::clock::Deadline;

/// Dehydration key for [`WaitGroup`].
pub const HYDRATION_KEY: &str = "sync::waitgroup";

/// The memory layout backing a `WaitGroup`: one non-negative `i32` counter.
pub const ELEMENT_LAYOUT: &[LayoutItem] = &[LayoutItem {
    tag: ElementTag::I32,
    count: 1,
}];

/// A counter threads can `add` work to and `wait` on until it drains back
/// to zero. Every `add` must causally precede its matching `done`; adding
/// more work after a `wait` has already observed zero is not supported.
#[derive(Clone, Debug)]
pub struct WaitGroup {
    counter: Address<i32>,
}

impl WaitGroup {
    /// Allocate a new, zeroed wait group.
    pub fn make() -> Result<Self> {
        let (mem, offsets) = try_alloc(ELEMENT_LAYOUT)?;
        let (offset, count) = offsets[0];
        Ok(Self {
            counter: Address::new(mem, offset, count)?,
        })
    }

    /// Add `n` pending units of work.
    pub fn add(&self, n: i32) -> Result<()> {
        self.counter.fetch_add(0, n)?;
        Ok(())
    }

    /// Mark one unit of work done. Wakes all waiters once the counter
    /// reaches zero.
    pub fn done(&self) -> Result<()> {
        let prev = self.counter.fetch_sub(0, 1)?;
        if prev <= 1 {
            self.counter.notify_all(0)?;
        } else if prev <= 0 {
            return Err(Error::InvalidOperation(
                "done() called more times than add()".into(),
            ));
        }
        Ok(())
    }

    /// Block until the counter reaches zero, or `timeout` elapses.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = Deadline::from_timeout(timeout);
        loop {
            let cur = self.counter.load(0)?;
            if cur <= 0 {
                return Ok(true);
            }
            if deadline.is_expired() {
                return Ok(false);
            }
            if self.counter.wait(0, cur, deadline.remaining())? == WaitResult::TimedOut {
                return Ok(false);
            }
        }
    }

    /// Async variant of [`WaitGroup::wait`].
    pub fn wait_async(&self, timeout: Option<Duration>) -> impl Future<Output = Result<bool>> + Send + 'static {
        let this = self.clone();
        async move { tokio::task::spawn_blocking(move || this.wait(timeout)).await.unwrap() }
    }
}

impl Serialize for WaitGroup {
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
            serde_json::to_value(Wire { addr: &self.counter }).map_err(serde::ser::Error::custom)?,
        )
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WaitGroup {
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
        Ok(Self { counter: wire.addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_immediately_when_already_zero() {
        let wg = WaitGroup::make().unwrap();
        assert!(wg.wait(Some(Duration::from_millis(10))).unwrap());
    }

    #[test]
    fn converges_after_matching_add_and_done() {
        let wg = Arc::new(WaitGroup::make().unwrap());
        wg.add(22).unwrap();
        let mut handles = vec![];
        for i in 0..22 {
            let wg = Arc::clone(&wg);
            handles.push(thread::spawn(move || {
                thread::sleep(Duration::from_millis(u64::from(i) % 5));
                wg.done().unwrap();
            }));
        }
        assert!(wg.wait(Some(Duration::from_secs(5))).unwrap());
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn wait_times_out_if_never_drained() {
        let wg = WaitGroup::make().unwrap();
        wg.add(1).unwrap();
        assert!(!wg.wait(Some(Duration::from_millis(20))).unwrap());
    }
}
