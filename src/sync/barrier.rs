//! Shared-memory barrier: an embedded [`Mutex`] plus an epoch counter.
//! Reusable across epochs.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::Result;
use crate::memory::{try_alloc, ElementTag, LayoutItem, WaitResult};
use crate::sync::mutex::Mutex;
use crate::util::clock::Deadline;

/// Dehydration key for [`Barrier`].
pub const HYDRATION_KEY: &str = "sync::barrier";

/// The memory layout backing a `Barrier`: `num_hit` and `epoch_seq` words
/// (the embedded mutex owns its own separate allocation).
pub const ELEMENT_LAYOUT: &[LayoutItem] = &[LayoutItem {
    tag: ElementTag::I32,
    count: 2,
}];

const NUM_HIT: usize = 0;
const EPOCH_SEQ: usize = 1;

/// A cyclic barrier: `max_needed` participants must call `wait` before any
/// of them proceed, and the barrier resets for the next epoch.
#[derive(Clone, Debug)]
pub struct Barrier {
    mutex: Mutex,
    words: Address<i32>,
    max_needed: u32,
}

impl Barrier {
    /// Allocate a new barrier requiring `max_needed` participants per
    /// epoch. `max_needed` must be at least 1.
    pub fn make(max_needed: u32) -> Result<Self> {
        if max_needed == 0 {
            return Err(crate::error::Error::InvalidOperation(
                "barrier max_needed must be >= 1".into(),
            ));
        }
        let (mem, offsets) = try_alloc(ELEMENT_LAYOUT)?;
        let (offset, count) = offsets[0];
        Ok(Self {
            mutex: Mutex::make()?,
            words: Address::new(mem, offset, count)?,
            max_needed,
        })
    }

    /// Block until `max_needed` participants have called `wait` in this
    /// epoch, then release them all together and open the next epoch.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = Deadline::from_timeout(timeout);
        if !self.mutex.lock(deadline.remaining())? {
            return Ok(false);
        }
        let hit = self.words.fetch_add(NUM_HIT, 1)? + 1;
        if hit < self.max_needed as i32 {
            let snapshot = self.words.load(EPOCH_SEQ)?;
            self.mutex.unlock()?;
            if deadline.is_expired() {
                return Ok(false);
            }
            return Ok(self.words.wait(EPOCH_SEQ, snapshot, deadline.remaining())? != WaitResult::TimedOut);
        }
        self.words.store(NUM_HIT, 0)?;
        self.words.fetch_add(EPOCH_SEQ, 1)?;
        self.words.notify_all(EPOCH_SEQ)?;
        self.mutex.unlock()?;
        Ok(true)
    }

    /// Async variant of [`Barrier::wait`].
    pub fn wait_async(&self, timeout: Option<Duration>) -> impl Future<Output = Result<bool>> + Send + 'static {
        let this = self.clone();
        async move { tokio::task::spawn_blocking(move || this.wait(timeout)).await.unwrap() }
    }
}

impl Serialize for Barrier {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[derive(Serialize)]
        struct Wire<'a> {
            mux: &'a Mutex,
            addr: &'a Address<i32>,
            max_needed: u32,
        }
        crate::util::serde::DehydratedForm::new(
            HYDRATION_KEY,
            serde_json::to_value(Wire {
                mux: &self.mutex,
                addr: &self.words,
                max_needed: self.max_needed,
            })
            .map_err(serde::ser::Error::custom)?,
        )
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Barrier {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wire {
            mux: Mutex,
            addr: Address<i32>,
            max_needed: u32,
        }
        let form = crate::util::serde::DehydratedForm::deserialize(deserializer)?;
        let wire: Wire = serde_json::from_value(form.value).map_err(serde::de::Error::custom)?;
        Ok(Self {
            mutex: wire.mux,
            words: wire.addr,
            max_needed: wire.max_needed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::thread;

    #[test]
    fn three_participants_proceed_together() {
        let b = Arc::new(Barrier::make(3).unwrap());
        let reached = Arc::new(StdMutex::new(0));
        let mut handles = vec![];
        for _ in 0..3 {
            let b = Arc::clone(&b);
            let reached = Arc::clone(&reached);
            handles.push(thread::spawn(move || {
                assert!(b.wait(Some(Duration::from_secs(5))).unwrap());
                *reached.lock().unwrap() += 1;
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*reached.lock().unwrap(), 3);
    }

    #[test]
    fn reusable_across_epochs() {
        let b = Arc::new(Barrier::make(2).unwrap());
        for _epoch in 0..2 {
            let b1 = Arc::clone(&b);
            let b2 = Arc::clone(&b);
            let h1 = thread::spawn(move || b1.wait(Some(Duration::from_secs(5))).unwrap());
            let h2 = thread::spawn(move || b2.wait(Some(Duration::from_secs(5))).unwrap());
            assert!(h1.join().unwrap());
            assert!(h2.join().unwrap());
        }
    }

    #[test]
    fn times_out_with_too_few_participants() {
        let b = Barrier::make(2).unwrap();
        assert!(!b.wait(Some(Duration::from_millis(30))).unwrap());
    }
}
