//! End-to-end coverage of the shared-memory sync primitives driven from
//! worker threads: mutex contention, a wait group draining fan-out work,
//! a reusable barrier, and a single-permit semaphore.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use parking_lot_workers::error::Result;
use parking_lot_workers::sync::{Barrier, Mutex, Semaphore, WaitGroup};
use parking_lot_workers::thread::{SpawnOptions, Thread};
use parking_lot_workers::worker::WorkerHandlers;

struct Incrementer {
    mutex: Mutex,
    counter: Arc<AtomicI64>,
}

#[async_trait]
impl WorkerHandlers for Incrementer {
    async fn onwork(&mut self, _payload: Value) -> Result<Value> {
        for _ in 0..50 {
            assert!(self.mutex.lock(Some(Duration::from_secs(5))).unwrap());
            self.counter.fetch_add(1, Ordering::SeqCst);
            self.mutex.unlock().unwrap();
        }
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn mutex_serializes_increments_across_two_workers() {
    let mutex = Mutex::make().unwrap();
    let counter = Arc::new(AtomicI64::new(0));

    let w1 = Thread::spawn(
        Incrementer { mutex: mutex.clone(), counter: Arc::clone(&counter) },
        SpawnOptions::default(),
    )
    .await
    .unwrap();
    let w2 = Thread::spawn(
        Incrementer { mutex: mutex.clone(), counter: Arc::clone(&counter) },
        SpawnOptions::default(),
    )
    .await
    .unwrap();

    let (r1, r2) = tokio::join!(w1.send_work(Value::Null), w2.send_work(Value::Null));
    r1.unwrap();
    r2.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 100);

    w1.close().unwrap();
    w2.close().unwrap();
}

struct Worker {
    wg: WaitGroup,
}

#[async_trait]
impl WorkerHandlers for Worker {
    async fn onwork(&mut self, _payload: Value) -> Result<Value> {
        self.wg.done()?;
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn wait_group_drains_once_every_worker_reports_done() {
    let wg = WaitGroup::make().unwrap();
    wg.add(3).unwrap();

    let mut workers = vec![];
    for _ in 0..3 {
        workers.push(
            Thread::spawn(Worker { wg: wg.clone() }, SpawnOptions::default())
                .await
                .unwrap(),
        );
    }

    for w in &workers {
        w.send_work(Value::Null).await.unwrap();
    }

    assert!(wg.wait(Some(Duration::from_secs(5))).unwrap());
    for w in workers {
        w.close().unwrap();
    }
}

struct Rendezvous {
    barrier: Barrier,
    reached: Arc<AtomicI64>,
}

#[async_trait]
impl WorkerHandlers for Rendezvous {
    async fn onwork(&mut self, _payload: Value) -> Result<Value> {
        assert!(self.barrier.wait(Some(Duration::from_secs(5))).unwrap());
        self.reached.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn barrier_releases_all_participants_together_and_resets() {
    let barrier = Barrier::make(3).unwrap();
    let reached = Arc::new(AtomicI64::new(0));

    let mut workers = vec![];
    for _ in 0..3 {
        workers.push(
            Thread::spawn(
                Rendezvous { barrier: barrier.clone(), reached: Arc::clone(&reached) },
                SpawnOptions::default(),
            )
            .await
            .unwrap(),
        );
    }

    let mut sends = vec![];
    for w in &workers {
        let w = w.clone();
        sends.push(tokio::spawn(async move { w.send_work(Value::Null).await }));
    }
    for s in sends {
        s.await.unwrap().unwrap();
    }
    assert_eq!(reached.load(Ordering::SeqCst), 3);

    // Second epoch, same barrier, fewer participants than needed: the lone
    // waiter should time out rather than proceed.
    assert!(!barrier.wait(Some(Duration::from_millis(30))).unwrap());

    for w in workers {
        w.close().unwrap();
    }
}

struct SingleHolder {
    sem: Semaphore,
    total: Arc<AtomicI64>,
}

#[async_trait]
impl WorkerHandlers for SingleHolder {
    async fn onwork(&mut self, _payload: Value) -> Result<Value> {
        for _ in 0..50 {
            assert!(self.sem.acquire(Some(Duration::from_secs(5))).unwrap());
            self.total.fetch_add(1, Ordering::SeqCst);
            self.sem.release().unwrap();
        }
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn semaphore_of_one_bounds_two_competing_workers() {
    let sem = Semaphore::make(1).unwrap();
    let total = Arc::new(AtomicI64::new(0));

    let w1 = Thread::spawn(
        SingleHolder { sem: sem.clone(), total: Arc::clone(&total) },
        SpawnOptions::default(),
    )
    .await
    .unwrap();
    let w2 = Thread::spawn(
        SingleHolder { sem: sem.clone(), total: Arc::clone(&total) },
        SpawnOptions::default(),
    )
    .await
    .unwrap();

    let (r1, r2) = tokio::join!(w1.send_work(Value::Null), w2.send_work(Value::Null));
    r1.unwrap();
    r2.unwrap();
    assert_eq!(total.load(Ordering::SeqCst), 100);

    w1.close().unwrap();
    w2.close().unwrap();
}
