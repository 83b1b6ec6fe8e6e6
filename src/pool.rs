//! A pool of [`crate::thread::Thread`]s behind a scheduling strategy,
//! growing and shrinking the live set between `min_threads` and
//! `max_threads`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::TransferItem;
use crate::thread::{CloseHandler, ErrorHandler, EventHandler, SpawnOptions, Thread, TransferHandler};
use crate::worker::WorkerHandlers;

/// One slot in the pool's thread table. `id` is stable for the slot's
/// lifetime and never reused, so a slot's own `on_close` callback can find
/// its current position in `slots` (or confirm it's already gone) even
/// after other slots have shifted it via `swap_remove`.
struct ThreadSlot {
    id: u64,
    thread: Thread,
}

/// What a [`SchedulerStrategy`] decided to do with a dispatch.
pub enum Selection {
    /// Route to the live slot at this index.
    Use(usize),
    /// No live slot is idle enough; spawn a new one.
    Grow,
    /// Nothing usable and growth is not allowed.
    None,
}

/// Picks which live thread (or whether to grow) serves the next
/// `send_work` call.
pub trait SchedulerStrategy: Send + Sync {
    /// Decide where to route the next unit of work.
    fn select(&self, slots: &[Thread], can_grow: bool) -> Selection;
}

/// Routes to whichever live thread currently has the fewest pending
/// requests (including pool-reserved claims), growing when all are busy.
#[derive(Default)]
pub struct LeastPendingStrategy;

impl SchedulerStrategy for LeastPendingStrategy {
    fn select(&self, slots: &[Thread], can_grow: bool) -> Selection {
        if slots.is_empty() {
            return if can_grow { Selection::Grow } else { Selection::None };
        }
        let (idx, pending) = slots
            .iter()
            .enumerate()
            .map(|(i, t)| (i, t.num_pending_requests()))
            .min_by_key(|(_, pending)| *pending)
            .expect("slots is non-empty");
        if pending > 0 && can_grow {
            Selection::Grow
        } else {
            Selection::Use(idx)
        }
    }
}

/// Options controlling a [`ThreadPool`]'s shape and lifecycle.
pub struct PoolOptions {
    /// Payload forwarded to every worker's `oninit`.
    pub init: Value,
    /// Strategy used to route each `send_work` call.
    pub strategy: Box<dyn SchedulerStrategy>,
    /// Upper bound on live worker threads.
    pub max_threads: usize,
    /// Worker threads kept alive even while idle.
    pub min_threads: usize,
    /// Idle-close timeout applied to threads above `min_threads`.
    pub close_thread_when_idle: Option<Duration>,
    /// Attempts `send_work` makes before giving up.
    pub queue_retries: u32,
    /// Invoked for unsolicited events from any worker.
    pub on_event: Option<EventHandler>,
    /// Invoked for an unsolicited transfer from any worker.
    pub on_transfer: Option<TransferHandler>,
    /// Invoked for an unattributed error from any worker.
    pub on_error: Option<ErrorHandler>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        let max_threads = num_cpus::get();
        Self {
            init: Value::Null,
            strategy: Box::new(LeastPendingStrategy),
            max_threads,
            min_threads: max_threads,
            close_thread_when_idle: None,
            queue_retries: 5,
            on_event: None,
            on_transfer: None,
            on_error: None,
        }
    }
}

impl PoolOptions {
    /// Build `PoolOptions`'s sizing and retry knobs from a [`crate::config::PoolConfig`],
    /// keeping `init`, `strategy` and the handler callbacks at their defaults.
    /// Fails with the same message as [`crate::config::PoolConfig::validate`]
    /// if `config` describes an invalid `max_threads`/`min_threads`/`queue_retries`
    /// combination.
    pub fn from_config(config: &crate::config::PoolConfig) -> Result<Self, String> {
        let (max_threads, min_threads) = config.validate()?;
        Ok(Self {
            max_threads,
            min_threads,
            close_thread_when_idle: config.close_thread_when_idle(),
            queue_retries: config.queue_retries,
            ..Self::default()
        })
    }
}

type HandlerFactory = dyn Fn() -> Box<dyn WorkerHandlers> + Send + Sync;
type SharedEventHandler = dyn Fn(Value) + Send + Sync;
type SharedTransferHandler = dyn Fn(Value, Vec<TransferItem>) + Send + Sync;
type SharedErrorHandler = dyn Fn(&Error) + Send + Sync;

struct PoolInner {
    slots: Mutex<Vec<ThreadSlot>>,
    strategy: Box<dyn SchedulerStrategy>,
    factory: Arc<HandlerFactory>,
    init: Value,
    max_threads: usize,
    min_threads: usize,
    close_thread_when_idle: Option<Duration>,
    queue_retries: u32,
    closed: AtomicBool,
    next_slot_id: AtomicU64,
    on_event: Option<Arc<SharedEventHandler>>,
    on_transfer: Option<Arc<SharedTransferHandler>>,
    on_error: Option<Arc<SharedErrorHandler>>,
}

/// A pool of worker threads dispatching through a [`SchedulerStrategy`],
/// growing up to `max_threads` and shrinking back down to `min_threads`
/// as workers idle-close.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl ThreadPool {
    /// Eagerly spawn `min_threads` workers, each built from a fresh call
    /// to `handlers_factory` (every worker needs its own handler
    /// instance). If any spawn fails, the already-spawned workers are
    /// killed and the error is returned.
    pub async fn spawn<F, H>(handlers_factory: F, opts: PoolOptions) -> Result<Self>
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: WorkerHandlers,
    {
        let factory: Arc<HandlerFactory> = Arc::new(move || Box::new(handlers_factory()) as Box<dyn WorkerHandlers>);
        let on_event: Option<Arc<SharedEventHandler>> = opts.on_event.map(|cb| Arc::from(cb) as Arc<SharedEventHandler>);
        let on_transfer: Option<Arc<SharedTransferHandler>> =
            opts.on_transfer.map(|cb| Arc::from(cb) as Arc<SharedTransferHandler>);
        let on_error: Option<Arc<SharedErrorHandler>> = opts.on_error.map(|cb| Arc::from(cb) as Arc<SharedErrorHandler>);

        let inner = Arc::new(PoolInner {
            slots: Mutex::new(Vec::new()),
            strategy: opts.strategy,
            factory,
            init: opts.init,
            max_threads: opts.max_threads,
            min_threads: opts.min_threads,
            close_thread_when_idle: opts.close_thread_when_idle,
            queue_retries: opts.queue_retries,
            closed: AtomicBool::new(false),
            next_slot_id: AtomicU64::new(0),
            on_event,
            on_transfer,
            on_error,
        });

        let mut spawned = Vec::with_capacity(inner.min_threads);
        for index in 0..inner.min_threads {
            match spawn_slot_async(&inner, index).await {
                Ok(slot) => spawned.push(slot),
                Err(e) => {
                    for slot in spawned {
                        slot.thread.kill();
                    }
                    return Err(e);
                }
            }
        }
        *inner.slots.lock() = spawned;
        Ok(Self { inner })
    }

    /// Dispatch `payload` to whichever thread the pool's strategy picks,
    /// retrying up to `queue_retries` times with `2 * attempt` ms backoff
    /// between attempts. Fails immediately with [`Error::PoolClosed`] if
    /// the pool has been closed.
    pub async fn send_work(&self, payload: Value) -> Result<Value> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }

        let mut attempt = 0u32;
        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(Error::PoolClosed);
            }

            let thread = match select_thread(&self.inner).await? {
                Some(t) => t,
                None => return Err(Error::SchedulerExhausted(attempt)),
            };

            thread.pool_claim();
            let result = thread.send_work(payload.clone()).await;
            thread.pool_release();

            match result {
                Ok(v) => return Ok(v),
                Err(Error::ThreadStopped(_) | Error::ShuttingDown(_)) => {
                    attempt += 1;
                    if attempt >= self.inner.queue_retries {
                        return Err(Error::SchedulerExhausted(attempt));
                    }
                    tokio::time::sleep(Duration::from_millis(2 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Number of currently live worker threads.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// Configured upper bound on live worker threads.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.max_threads
    }

    /// Close the pool: marks it closed (new `send_work` calls fail with
    /// [`Error::PoolClosed`]) and asks every live thread to close
    /// gracefully.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for slot in self.inner.slots.lock().iter() {
            if let Err(e) = slot.thread.close() {
                warn!(error = %e, "error closing pool thread");
            }
        }
    }

    /// Terminate every live thread immediately.
    pub fn kill(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for slot in self.inner.slots.lock().drain(..) {
            slot.thread.kill();
        }
    }
}

async fn select_thread(inner: &Arc<PoolInner>) -> Result<Option<Thread>> {
    loop {
        let can_grow = inner.slots.lock().len() < inner.max_threads;

        let selection = {
            let slots = inner.slots.lock();
            let handles: Vec<Thread> = slots.iter().map(|s| s.thread.clone()).collect();
            inner.strategy.select(&handles, can_grow)
        };

        match selection {
            Selection::Use(idx) => {
                let slots = inner.slots.lock();
                return Ok(slots.get(idx).map(|s| s.thread.clone()));
            }
            Selection::Grow => {
                let index = inner.slots.lock().len();
                if index >= inner.max_threads {
                    continue;
                }
                let slot = spawn_slot_async(inner, index).await?;
                let handle = slot.thread.clone();
                inner.slots.lock().push(slot);
                return Ok(Some(handle));
            }
            Selection::None => return Ok(None),
        }
    }
}

/// Build the on-close policy and spawn one worker thread. `index` is only
/// used to decide, once, whether this slot is part of the core pool
/// (`index < min_threads`, spawned up front and always respawned in place)
/// or an overflow slot (grown on demand and evicted on idle-close); the
/// slot's actual position in `slots` is tracked separately by a stable id,
/// since overflow evictions reshuffle positions via `swap_remove`.
async fn spawn_slot_async(inner: &Arc<PoolInner>, index: usize) -> Result<ThreadSlot> {
    let is_core = index < inner.min_threads;
    let idle = if is_core { None } else { inner.close_thread_when_idle };
    let slot_id = inner.next_slot_id.fetch_add(1, Ordering::SeqCst);

    let on_close: CloseHandler = {
        let inner = Arc::clone(inner);
        Box::new(move || {
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            if is_core {
                debug!(slot_id, "respawning core pool thread after close");
                respawn_in_place(Arc::clone(&inner), slot_id);
            } else {
                debug!(slot_id, "evicting idle-closed overflow thread");
                let mut slots = inner.slots.lock();
                if let Some(pos) = slots.iter().position(|s| s.id == slot_id) {
                    slots.swap_remove(pos);
                }
            }
        })
    };

    let on_event: Option<EventHandler> = inner.on_event.clone().map(|cb| Box::new(move |v| cb(v)) as EventHandler);
    let on_transfer: Option<TransferHandler> = inner
        .on_transfer
        .clone()
        .map(|cb| Box::new(move |m, items| cb(m, items)) as TransferHandler);
    let on_error: Option<ErrorHandler> = inner.on_error.clone().map(|cb| Box::new(move |e: &Error| cb(e)) as ErrorHandler);

    let opts = SpawnOptions {
        init: inner.init.clone(),
        on_event,
        on_transfer,
        on_error,
        close_when_idle: idle,
        on_close: Some(on_close),
    };

    let handlers = (inner.factory)();
    let thread = Thread::spawn(BoxedHandlers(handlers), opts).await?;
    Ok(ThreadSlot { id: slot_id, thread })
}

struct BoxedHandlers(Box<dyn WorkerHandlers>);

#[async_trait]
impl WorkerHandlers for BoxedHandlers {
    async fn oninit(&mut self, init: Value) -> Result<()> {
        self.0.oninit(init).await
    }
    async fn onwork(&mut self, payload: Value) -> Result<Value> {
        self.0.onwork(payload).await
    }
    async fn onevent(&mut self, payload: Value) -> Result<()> {
        self.0.onevent(payload).await
    }
    async fn onshare(&mut self, item: Value, message: Value) -> Result<()> {
        self.0.onshare(item, message).await
    }
    async fn ontransfer(&mut self, message: Value, items: Vec<TransferItem>) -> Result<()> {
        self.0.ontransfer(message, items).await
    }
    async fn onclose(&mut self) {
        self.0.onclose().await;
    }
}

/// Respawn the core slot previously identified by `closed_slot_id`,
/// replacing it wherever it currently sits in `slots` (found by scanning,
/// since its position may have shifted since it was spawned) rather than
/// trusting a captured index that other slots' evictions may have
/// invalidated.
fn respawn_in_place(inner: Arc<PoolInner>, closed_slot_id: u64) {
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = %e, closed_slot_id, "failed to build respawn runtime, thread not replaced");
                return;
            }
        };
        // `index` only needs to be < min_threads so the new slot is spawned
        // as core again; the exact value doesn't matter for placement.
        let result = rt.block_on(spawn_slot_async(&inner, 0));
        match result {
            Ok(slot) => {
                let mut slots = inner.slots.lock();
                match slots.iter().position(|s| s.id == closed_slot_id) {
                    Some(pos) => slots[pos] = slot,
                    None => slots.push(slot),
                }
            }
            Err(e) => warn!(error = %e, closed_slot_id, "failed to respawn pool thread"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Echo;

    #[async_trait]
    impl WorkerHandlers for Echo {
        async fn onwork(&mut self, payload: Value) -> Result<Value> {
            Ok(payload)
        }
    }

    #[tokio::test]
    async fn least_pending_strategy_picks_idlest_slot() {
        let t0 = Thread::spawn(Echo, SpawnOptions::default()).await.unwrap();
        let t1 = Thread::spawn(Echo, SpawnOptions::default()).await.unwrap();
        let slots = vec![t0.clone(), t1.clone()];
        let strategy = LeastPendingStrategy;
        match strategy.select(&slots, false) {
            Selection::Use(idx) => assert!(idx == 0 || idx == 1),
            _ => panic!("expected Use"),
        }
        t0.kill();
        t1.kill();
    }

    #[tokio::test]
    async fn pool_dispatches_and_reports_size() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = ThreadPool::spawn(
            {
                let counter = Arc::clone(&counter);
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Echo
                }
            },
            PoolOptions {
                max_threads: 2,
                min_threads: 2,
                ..PoolOptions::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(pool.size(), 2);
        assert_eq!(pool.capacity(), 2);
        let result = pool.send_work(serde_json::json!(42)).await.unwrap();
        assert_eq!(result, serde_json::json!(42));
        pool.kill();
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn pool_grows_past_min_up_to_max() {
        struct Blocker;
        #[async_trait]
        impl WorkerHandlers for Blocker {
            async fn onwork(&mut self, payload: Value) -> Result<Value> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(payload)
            }
        }
        let pool = ThreadPool::spawn(
            || Blocker,
            PoolOptions {
                max_threads: 3,
                min_threads: 1,
                ..PoolOptions::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(pool.size(), 1);

        let p = Arc::new(pool);
        let mut handles = vec![];
        for i in 0..3 {
            let p = Arc::clone(&p);
            handles.push(tokio::spawn(async move { p.send_work(serde_json::json!(i)).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(p.size() <= 3);
        p.kill();
    }
}
