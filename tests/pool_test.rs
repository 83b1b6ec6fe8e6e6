//! End-to-end coverage of `ThreadPool`: eager `min_threads` spawn, growth
//! under concurrent load up to `max_threads`, and shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use parking_lot_workers::error::Result;
use parking_lot_workers::pool::{PoolOptions, ThreadPool};
use parking_lot_workers::worker::WorkerHandlers;

struct SlowEcho;

#[async_trait]
impl WorkerHandlers for SlowEcho {
    async fn onwork(&mut self, payload: Value) -> Result<Value> {
        tokio::time::sleep(Duration::from_millis(40)).await;
        Ok(payload)
    }
}

#[tokio::test]
async fn pool_grows_under_concurrent_load_and_reports_dynamic_size() {
    let spawned = Arc::new(AtomicUsize::new(0));
    let pool = ThreadPool::spawn(
        {
            let spawned = Arc::clone(&spawned);
            move || {
                spawned.fetch_add(1, Ordering::SeqCst);
                SlowEcho
            }
        },
        PoolOptions {
            max_threads: 4,
            min_threads: 1,
            ..PoolOptions::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(pool.size(), 1);
    assert_eq!(pool.capacity(), 4);

    let pool = Arc::new(pool);
    let mut handles = vec![];
    for i in 0..4 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move { pool.send_work(json!(i)).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert!(pool.size() > 1, "pool should have grown past min_threads under concurrent load");
    assert!(pool.size() <= 4);
    assert!(spawned.load(Ordering::SeqCst) as usize >= pool.size());

    pool.kill();
    assert_eq!(pool.size(), 0);
}

struct Echo;

#[async_trait]
impl WorkerHandlers for Echo {
    async fn onwork(&mut self, payload: Value) -> Result<Value> {
        Ok(payload)
    }
}

#[tokio::test]
async fn closed_pool_rejects_new_work() {
    let pool = ThreadPool::spawn(
        || Echo,
        PoolOptions { max_threads: 2, min_threads: 2, ..PoolOptions::default() },
    )
    .await
    .unwrap();

    pool.close();
    let err = pool.send_work(json!(1)).await.unwrap_err();
    assert!(matches!(err, parking_lot_workers::error::Error::PoolClosed));
}

struct TimedEcho {
    delay_ms: u64,
}

#[async_trait]
impl WorkerHandlers for TimedEcho {
    async fn onwork(&mut self, payload: Value) -> Result<Value> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        Ok(payload)
    }
}

/// Grows to three overflow slots (min_threads=0), lets the fastest one
/// idle-close first — which `swap_remove`s its slot and relocates whatever
/// was last in the vec into its old position — then lets the remaining
/// slots idle-close too. If the pool were still tracking slots by a
/// captured spawn-time index instead of a stable id, a relocated slot's
/// own close would check its now-stale index against the shrunk `slots`
/// length, skip its own removal, and leak a dead thread that inflates
/// `size()` forever.
#[tokio::test]
async fn mid_index_overflow_close_does_not_leak_dead_slots() {
    let spawn_order = Arc::new(AtomicUsize::new(0));
    let pool = ThreadPool::spawn(
        {
            let spawn_order = Arc::clone(&spawn_order);
            move || {
                let n = spawn_order.fetch_add(1, Ordering::SeqCst);
                // first-spawned slot finishes and goes idle well before
                // the other two, so it is the first to idle-close
                let delay_ms = if n == 0 { 10 } else { 300 };
                TimedEcho { delay_ms }
            }
        },
        PoolOptions {
            max_threads: 3,
            min_threads: 0,
            close_thread_when_idle: Some(Duration::from_millis(20)),
            ..PoolOptions::default()
        },
    )
    .await
    .unwrap();

    let pool = Arc::new(pool);
    let mut handles = vec![];
    for i in 0..3 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move { pool.send_work(json!(i)).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    let grown = pool.size();
    assert!(grown >= 2, "at least two overflow slots should have grown in, got {grown}");

    // the fast slot should idle-close around the 20ms mark, swap-removing
    // itself and relocating whichever slot was last in the vec into its
    // freed position
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(
        pool.size() < grown,
        "at least one overflow slot should have idle-closed by now"
    );

    // the remaining slots (one of them possibly relocated by the swap
    // above) finish their 300ms work and idle-close in turn; none should
    // be left behind as a dead, uncounted entry
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(pool.size(), 0, "every overflow slot should idle-close without leaking a dead slot");

    pool.kill();
}

/// `min_threads = 0` lets the pool scale all the way down to zero live
/// threads while idle, then a burst of concurrent work must still grow it
/// back up to `max_threads`, exercising the exact scale-to-zero-then-burst
/// scenario.
#[tokio::test]
async fn scales_to_zero_then_grows_again_under_a_burst() {
    let pool = ThreadPool::spawn(
        || TimedEcho { delay_ms: 10 },
        PoolOptions {
            max_threads: 4,
            min_threads: 0,
            close_thread_when_idle: Some(Duration::from_millis(20)),
            ..PoolOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(pool.size(), 0);

    let pool = Arc::new(pool);
    let mut handles = vec![];
    for i in 0..4 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move { pool.send_work(json!(i)).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert!(pool.size() >= 1 && pool.size() <= 4);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pool.size(), 0, "pool should scale back down to zero once idle again");

    pool.kill();
}
