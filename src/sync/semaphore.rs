//! Shared-memory counting semaphore. The counter tracks permits currently
//! *held*, bounded by `value`, not permits remaining.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::Result;
use crate::memory::{try_alloc, ElementTag, LayoutItem, WaitResult};
use crate::util::clock::Deadline;

/// Dehydration key for [`Semaphore`].
pub const HYDRATION_KEY: &str = "sync::semaphore";

/// The memory layout backing a `Semaphore`: one `i32` held-count.
pub const ELEMENT_LAYOUT: &[LayoutItem] = &[LayoutItem {
    tag: ElementTag::I32,
    count: 1,
}];

/// A counting semaphore bounding concurrent holders to `value`.
#[derive(Clone, Debug)]
pub struct Semaphore {
    counter: Address<i32>,
    value: i32,
}

impl Semaphore {
    /// Allocate a new semaphore with `value` permits. `value` must be at
    /// least 1.
    pub fn make(value: u32) -> Result<Self> {
        if value == 0 {
            return Err(crate::error::Error::InvalidOperation(
                "semaphore value must be >= 1".into(),
            ));
        }
        let (mem, offsets) = try_alloc(ELEMENT_LAYOUT)?;
        let (offset, count) = offsets[0];
        Ok(Self {
            counter: Address::new(mem, offset, count)?,
            value: value as i32,
        })
    }

    fn key(&self) -> (u64, usize) {
        let (handle, offset, _) = self.counter.raw_parts();
        (handle, offset)
    }

    /// Acquire one permit, blocking until one is available or `timeout`
    /// elapses.
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = Deadline::from_timeout(timeout);
        loop {
            let cur = self.counter.load(0)?;
            if cur < self.value {
                let prev = self.counter.compare_exchange(0, cur, cur + 1)?;
                if prev == cur {
                    super::held::mark(self.key());
                    return Ok(true);
                }
                continue;
            }
            if deadline.is_expired() {
                return Ok(false);
            }
            if self.counter.wait(0, self.value, deadline.remaining())? == WaitResult::TimedOut {
                return Ok(false);
            }
        }
    }

    /// Async variant of [`Semaphore::acquire`].
    pub fn acquire_async(&self, timeout: Option<Duration>) -> impl Future<Output = Result<bool>> + Send + 'static {
        let this = self.clone();
        async move { tokio::task::spawn_blocking(move || this.acquire(timeout)).await.unwrap() }
    }

    /// Release one permit.
    pub fn release(&self) -> Result<()> {
        self.counter.fetch_sub(0, 1)?;
        self.counter.notify_one(0)?;
        super::held::unmark(self.key());
        Ok(())
    }

    /// Whether the calling thread currently holds a permit it acquired
    /// (thread-local bookkeeping).
    #[must_use]
    pub fn has_acquired(&self) -> bool {
        super::held::contains(self.key())
    }
}

impl Serialize for Semaphore {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[derive(Serialize)]
        struct Wire<'a> {
            addr: &'a Address<i32>,
            value: i32,
        }
        crate::util::serde::DehydratedForm::new(
            HYDRATION_KEY,
            serde_json::to_value(Wire {
                addr: &self.counter,
                value: self.value,
            })
            .map_err(serde::ser::Error::custom)?,
        )
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Semaphore {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wire {
            addr: Address<i32>,
            value: i32,
        }
        let form = crate::util::serde::DehydratedForm::deserialize(deserializer)?;
        let wire: Wire = serde_json::from_value(form.value).map_err(serde::de::Error::custom)?;
        Ok(Self {
            counter: wire.addr,
            value: wire.value,
        })
    }
}
