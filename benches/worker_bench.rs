//! Benchmarks for the worker-thread protocol and shared-memory
//! primitives.
//!
//! Benchmarks cover:
//! - `Thread::send_work` round-trip latency
//! - `ThreadPool::send_work` throughput under a fixed worker count
//! - `sync::Mutex` contention under concurrent acquire/release

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::Value;
use tokio::runtime::Runtime;

use parking_lot_workers::error::Result;
use parking_lot_workers::pool::{PoolOptions, ThreadPool};
use parking_lot_workers::sync::Mutex;
use parking_lot_workers::thread::{SpawnOptions, Thread};
use parking_lot_workers::worker::WorkerHandlers;

struct Echo;

#[async_trait]
impl WorkerHandlers for Echo {
    async fn onwork(&mut self, payload: Value) -> Result<Value> {
        Ok(payload)
    }
}

fn bench_send_work_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let worker = rt.block_on(Thread::spawn(Echo, SpawnOptions::default())).unwrap();

    c.bench_function("thread_send_work_roundtrip", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(worker.send_work(serde_json::json!(1)).await.unwrap()) });
    });

    worker.kill();
}

fn bench_pool_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("pool_send_work");

    for worker_count in [1usize, 2, 4, 8] {
        let pool = rt
            .block_on(ThreadPool::spawn(
                || Echo,
                PoolOptions {
                    max_threads: worker_count,
                    min_threads: worker_count,
                    ..PoolOptions::default()
                },
            ))
            .unwrap();
        let pool = Arc::new(pool);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(worker_count), &pool, |b, pool| {
            b.to_async(&rt)
                .iter(|| async { black_box(pool.send_work(serde_json::json!(1)).await.unwrap()) });
        });

        pool.kill();
    }
    group.finish();
}

fn bench_mutex_contention(c: &mut Criterion) {
    let mux = Arc::new(Mutex::make().unwrap());

    c.bench_function("sync_mutex_lock_unlock", |b| {
        b.iter(|| {
            mux.lock(Some(Duration::from_secs(1))).unwrap();
            mux.unlock().unwrap();
        });
    });
}

criterion_group!(benches, bench_send_work_latency, bench_pool_throughput, bench_mutex_contention);
criterion_main!(benches);
