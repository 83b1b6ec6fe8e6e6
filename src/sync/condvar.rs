//! Shared-memory condition variable. Always paired with an external
//! [`crate::sync::Mutex`]; callers must loop on their own predicate since
//! spurious wakeups are possible.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::Result;
use crate::memory::{try_alloc, ElementTag, LayoutItem};
use crate::sync::mutex::Mutex;
use crate::util::clock::Deadline;

/// Dehydration key for [`ConditionVariable`].
pub const HYDRATION_KEY: &str = "sync::condvar";

/// The memory layout backing a `ConditionVariable`: `prev` and `seq` words.
pub const ELEMENT_LAYOUT: &[LayoutItem] = &[LayoutItem {
    tag: ElementTag::I32,
    count: 2,
}];

const PREV: usize = 0;
const SEQ: usize = 1;

/// A condition variable living in shared memory.
#[derive(Clone, Debug)]
pub struct ConditionVariable {
    words: Address<i32>,
}

impl ConditionVariable {
    /// Allocate a new condition variable.
    pub fn make() -> Result<Self> {
        let (mem, offsets) = try_alloc(ELEMENT_LAYOUT)?;
        let (offset, count) = offsets[0];
        Ok(Self {
            words: Address::new(mem, offset, count)?,
        })
    }

    /// Atomically unlock `mutex` and block until notified or `timeout`
    /// elapses, then reacquire `mutex` with whatever timeout remains.
    /// Returns `false` if either the wait or the reacquire timed out.
    pub fn wait(&self, mutex: &Mutex, timeout: Option<Duration>) -> Result<bool> {
        let deadline = Deadline::from_timeout(timeout);
        let v = self.words.load(SEQ)?;
        self.words.store(PREV, v)?;
        mutex.unlock()?;
        let woke = self.words.wait(SEQ, v, deadline.remaining())?;
        let woke_ok = woke != crate::memory::WaitResult::TimedOut;
        let relocked = mutex.lock(deadline.remaining())?;
        Ok(woke_ok && relocked)
    }

    /// Async variant of [`ConditionVariable::wait`].
    pub fn wait_async(
        &self,
        mutex: &Mutex,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<bool>> + Send + 'static {
        let this = self.clone();
        let mutex = mutex.clone();
        async move {
            tokio::task::spawn_blocking(move || this.wait(&mutex, timeout))
                .await
                .unwrap()
        }
    }

    /// Wake up to `count` waiters.
    pub fn notify(&self, count: u32) -> Result<()> {
        let prev = self.words.load(PREV)?;
        self.words.store(SEQ, prev.wrapping_add(1))?;
        self.words.notify(SEQ, count)?;
        Ok(())
    }

    /// Convenience for `notify(1)`.
    pub fn notify_one(&self) -> Result<()> {
        self.notify(1)
    }

    /// Convenience for `notify(u32::MAX)`.
    pub fn notify_all(&self) -> Result<()> {
        self.notify(u32::MAX)
    }
}

impl Serialize for ConditionVariable {
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
            serde_json::to_value(Wire { addr: &self.words }).map_err(serde::ser::Error::custom)?,
        )
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConditionVariable {
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
        Ok(Self { words: wire.addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn producer_consumer_reaches_count() {
        let mutex = Mutex::make().unwrap();
        let cv = ConditionVariable::make().unwrap();
        let counter = Address::<i32>::new(crate::memory::SharedMemory::new(4), 0, 1).unwrap();
        counter.store(0, 0).unwrap();

        let mutex2 = mutex.clone();
        let cv2 = cv.clone();
        let counter2 = counter.clone();
        let producer = thread::spawn(move || {
            for _ in 0..12 {
                mutex2.lock(None).unwrap();
                counter2.fetch_add(0, 1).unwrap();
                cv2.notify_one().unwrap();
                mutex2.unlock().unwrap();
                thread::sleep(Duration::from_millis(2));
            }
        });

        mutex.lock(None).unwrap();
        loop {
            if counter.load(0).unwrap() >= 12 {
                break;
            }
            assert!(cv.wait(&mutex, Some(Duration::from_secs(5))).unwrap());
        }
        mutex.unlock().unwrap();
        producer.join().unwrap();
        assert_eq!(counter.load(0).unwrap(), 12);
    }

    #[test]
    fn wait_times_out_without_notify() {
        let mutex = Mutex::make().unwrap();
        let cv = ConditionVariable::make().unwrap();
        mutex.lock(None).unwrap();
        let woke = cv.wait(&mutex, Some(Duration::from_millis(30))).unwrap();
        assert!(!woke);
    }

    #[test]
    fn dehydrate_hydrate_shares_state() {
        let cv = ConditionVariable::make().unwrap();
        let v = serde_json::to_value(&cv).unwrap();
        let cv2: ConditionVariable = serde_json::from_value(v).unwrap();
        let _ = Arc::new(cv2);
    }
}
