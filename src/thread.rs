//! The parent-side driver: spawns a worker OS thread, correlates
//! request/response pairs, and exposes `send_work`/`send_event`/`share`/
//! `transfer`/`close`/`kill`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::{Envelope, TransferItem, WireError};
use crate::worker::WorkerHandlers;

/// Hierarchical identifier for a `Thread`: `"main"` for the implicit root,
/// `"<parent>-><n>"` for each worker spawned under it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadId(pub String);

impl ThreadId {
    /// The implicit root id every top-level `Thread::spawn` is a child of.
    #[must_use]
    pub fn main() -> Self {
        Self("main".into())
    }

    /// Build the id of the `n`th child of `self`.
    #[must_use]
    pub fn child(&self, n: u64) -> Self {
        Self(format!("{}->{n}", self.0))
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Callback invoked for unsolicited events from a worker (fire-and-forget
/// `onevent` sends, or an unsolicited `transfer`).
pub type EventHandler = Box<dyn Fn(Value) + Send + Sync>;
/// Callback invoked for an unsolicited transfer from a worker.
pub type TransferHandler = Box<dyn Fn(Value, Vec<TransferItem>) + Send + Sync>;
/// Callback invoked for an error the worker could not attribute to a
/// specific pending request.
pub type ErrorHandler = Box<dyn Fn(&Error) + Send + Sync>;
/// Callback invoked once a worker has finished closing, gracefully or not.
pub type CloseHandler = Box<dyn Fn() + Send + Sync>;

/// Options controlling how a `Thread` is spawned and behaves.
pub struct SpawnOptions {
    /// Payload forwarded to the worker's `oninit`.
    pub init: Value,
    /// Invoked for unsolicited events from the worker.
    pub on_event: Option<EventHandler>,
    /// Invoked for an unsolicited transfer from the worker.
    pub on_transfer: Option<TransferHandler>,
    /// Invoked for unattributed worker errors.
    pub on_error: Option<ErrorHandler>,
    /// If set, the worker closes itself after this long with no messages
    /// in flight.
    pub close_when_idle: Option<Duration>,
    /// Invoked once the worker has finished closing.
    pub on_close: Option<CloseHandler>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            init: Value::Null,
            on_event: None,
            on_transfer: None,
            on_error: None,
            close_when_idle: None,
            on_close: None,
        }
    }
}

enum Pending {
    Work(oneshot::Sender<Result<Value>>),
    Share(oneshot::Sender<Result<()>>),
    Transfer(oneshot::Sender<Result<()>>),
}

struct Shared {
    id: ThreadId,
    to_worker: Mutex<Option<Sender<Envelope>>>,
    pending: Mutex<std::collections::HashMap<Uuid, Pending>>,
    killed: AtomicBool,
    pending_count: AtomicU32,
    pool_claims: AtomicU32,
    reader: Mutex<Option<JoinHandle<()>>>,
    worker_thread: Mutex<Option<JoinHandle<()>>>,
    on_event: Mutex<Option<EventHandler>>,
    on_transfer: Mutex<Option<TransferHandler>>,
    on_error: Mutex<Option<ErrorHandler>>,
    on_close: Mutex<Option<CloseHandler>>,
}

static NEXT_CHILD: AtomicU64 = AtomicU64::new(0);

/// A handle to a running worker thread.
#[derive(Clone)]
pub struct Thread {
    shared: Arc<Shared>,
}

impl Thread {
    /// Spawn a new worker thread running `handlers`, resolving once the
    /// worker's `oninit` has completed.
    pub async fn spawn(handlers: impl WorkerHandlers, opts: SpawnOptions) -> Result<Self> {
        let id = ThreadId::main().child(NEXT_CHILD.fetch_add(1, Ordering::Relaxed));
        let (to_worker, from_parent) = unbounded::<Envelope>();
        let (to_parent, from_worker) = unbounded::<Envelope>();

        let worker_id = id.clone();
        let worker_thread = std::thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                crate::worker::run_dispatch_loop(Box::new(handlers), worker_id, to_parent, from_parent);
            })
            .map_err(|e| Error::InitializationFailed(e.to_string()))?;

        let shared = Arc::new(Shared {
            id: id.clone(),
            to_worker: Mutex::new(Some(to_worker.clone())),
            pending: Mutex::new(std::collections::HashMap::new()),
            killed: AtomicBool::new(false),
            pending_count: AtomicU32::new(0),
            pool_claims: AtomicU32::new(0),
            reader: Mutex::new(None),
            worker_thread: Mutex::new(Some(worker_thread)),
            on_event: Mutex::new(opts.on_event),
            on_transfer: Mutex::new(opts.on_transfer),
            on_error: Mutex::new(opts.on_error),
            on_close: Mutex::new(opts.on_close),
        });

        let (initd_tx, initd_rx) = oneshot::channel::<std::result::Result<(), WireError>>();
        let reader = spawn_reader(Arc::clone(&shared), from_worker, initd_tx);
        *shared.reader.lock() = Some(reader);

        shared
            .send(Envelope::Init {
                init: opts.init,
                close_when_idle: opts.close_when_idle,
            })
            .map_err(|_| Error::InitializationFailed("worker channel closed immediately".into()))?;

        match initd_rx.await {
            Ok(Ok(())) => Ok(Self { shared }),
            Ok(Err(e)) => Err(Error::InitializationFailed(e.message)),
            Err(_) => Err(Error::InitializationFailed(
                "worker exited before acknowledging init".into(),
            )),
        }
    }

    /// This thread's hierarchical id.
    #[must_use]
    pub fn id(&self) -> &ThreadId {
        &self.shared.id
    }

    /// Outstanding requests plus any pool-reserved claims.
    #[must_use]
    pub fn num_pending_requests(&self) -> u32 {
        self.shared.pending_count.load(Ordering::SeqCst) + self.shared.pool_claims.load(Ordering::SeqCst)
    }

    /// Reserve this thread for a pending selection decision, without yet
    /// sending work. Used by `ThreadPool` so a strategy's choice is not
    /// invalidated by a concurrent selection.
    pub fn pool_claim(&self) {
        self.shared.pool_claims.fetch_add(1, Ordering::SeqCst);
    }

    /// Release a claim taken by [`Thread::pool_claim`].
    pub fn pool_release(&self) {
        self.shared.pool_claims.fetch_sub(1, Ordering::SeqCst);
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.shared.killed.load(Ordering::SeqCst) {
            Err(Error::ThreadStopped(self.shared.id.to_string()))
        } else {
            Ok(())
        }
    }

    /// Dispatch a unit of work and await its result.
    pub async fn send_work(&self, payload: Value) -> Result<Value> {
        self.ensure_alive()?;
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, Pending::Work(tx));
        self.shared.pending_count.fetch_add(1, Ordering::SeqCst);
        if self.shared.send(Envelope::Work { id, payload }).is_err() {
            self.shared.pending.lock().remove(&id);
            self.shared.pending_count.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::ThreadStopped(self.shared.id.to_string()));
        }
        let result = rx
            .await
            .map_err(|_| Error::ThreadStopped(self.shared.id.to_string()))?;
        self.shared.pending_count.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// Dispatch a fire-and-forget event; never resolves a reply.
    pub fn send_event(&self, payload: Value) -> Result<()> {
        self.ensure_alive()?;
        self.shared.send(Envelope::Event { payload })
    }

    /// Share a resource with the worker, awaiting its acknowledgment.
    pub async fn share(&self, item: Value, message: Value) -> Result<()> {
        self.ensure_alive()?;
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, Pending::Share(tx));
        if self.shared.send(Envelope::Share { id, item, message }).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(Error::ThreadStopped(self.shared.id.to_string()));
        }
        rx.await.map_err(|_| Error::ThreadStopped(self.shared.id.to_string()))?
    }

    /// Transfer ownership of `items` to the worker, awaiting its
    /// acknowledgment. `items` is drained, leaving the caller with none.
    pub async fn transfer(&self, message: Value, mut items: Vec<TransferItem>) -> Result<()> {
        self.ensure_alive()?;
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, Pending::Transfer(tx));
        let items = items.drain(..).collect();
        if self
            .shared
            .send(Envelope::Transfer { id: Some(id), message, items })
            .is_err()
        {
            self.shared.pending.lock().remove(&id);
            return Err(Error::ThreadStopped(self.shared.id.to_string()));
        }
        rx.await.map_err(|_| Error::ThreadStopped(self.shared.id.to_string()))?
    }

    /// Ask the worker to close gracefully. Further API calls fail with
    /// [`Error::InvalidOperation`].
    pub fn close(&self) -> Result<()> {
        self.shared.killed.store(true, Ordering::SeqCst);
        self.shared.send(Envelope::Close)
    }

    /// Terminate the worker immediately, rejecting all outstanding
    /// requests with [`Error::ThreadStopped`].
    pub fn kill(&self) {
        self.shared.killed.store(true, Ordering::SeqCst);
        *self.shared.to_worker.lock() = None;
        reject_all_pending(&self.shared, "killed");
        if let Some(handle) = self.shared.worker_thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Rebind the callback invoked for unsolicited events from the worker.
    pub fn set_on_event(&self, cb: Option<EventHandler>) -> Result<()> {
        self.ensure_alive()?;
        *self.shared.on_event.lock() = cb;
        Ok(())
    }

    /// Rebind the callback invoked for an unsolicited transfer from the
    /// worker.
    pub fn set_on_transfer(&self, cb: Option<TransferHandler>) -> Result<()> {
        self.ensure_alive()?;
        *self.shared.on_transfer.lock() = cb;
        Ok(())
    }

    /// Rebind the callback invoked for unattributed worker errors.
    pub fn set_on_error(&self, cb: Option<ErrorHandler>) -> Result<()> {
        self.ensure_alive()?;
        *self.shared.on_error.lock() = cb;
        Ok(())
    }

    /// Rebind the callback invoked once the worker has finished closing.
    pub fn set_on_close(&self, cb: Option<CloseHandler>) -> Result<()> {
        self.ensure_alive()?;
        *self.shared.on_close.lock() = cb;
        Ok(())
    }
}

impl Shared {
    fn send(&self, env: Envelope) -> Result<()> {
        let guard = self.to_worker.lock();
        match guard.as_ref() {
            Some(tx) => tx
                .send(env)
                .map_err(|_| Error::ThreadStopped(self.id.to_string())),
            None => Err(Error::ThreadStopped(self.id.to_string())),
        }
    }
}

fn reject_all_pending(shared: &Shared, reason: &str) {
    let mut pending = shared.pending.lock();
    for (_, p) in pending.drain() {
        match p {
            Pending::Work(tx) => {
                let _ = tx.send(Err(Error::ThreadStopped(reason.into())));
            }
            Pending::Share(tx) => {
                let _ = tx.send(Err(Error::ThreadStopped(reason.into())));
            }
            Pending::Transfer(tx) => {
                let _ = tx.send(Err(Error::ThreadStopped(reason.into())));
            }
        }
    }
}

fn spawn_reader(
    shared: Arc<Shared>,
    from_worker: Receiver<Envelope>,
    mut initd_tx: oneshot::Sender<std::result::Result<(), WireError>>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("thread-reader-{}", shared.id))
        .spawn(move || {
            for envelope in from_worker.iter() {
                match envelope {
                    Envelope::Initd(result) => {
                        let _ = std::mem::replace(&mut initd_tx, oneshot::channel().0).send(result);
                    }
                    Envelope::WorkResult { id, result } => {
                        if let Some(Pending::Work(tx)) = shared.pending.lock().remove(&id) {
                            let _ = tx.send(result.map_err(Error::from));
                        }
                    }
                    Envelope::Shared { id, result } => {
                        if let Some(Pending::Share(tx)) = shared.pending.lock().remove(&id) {
                            let _ = tx.send(result.map_err(Error::from));
                        }
                    }
                    Envelope::Transferd { id, result } => {
                        if let Some(Pending::Transfer(tx)) = shared.pending.lock().remove(&id) {
                            let _ = tx.send(result.map_err(Error::from));
                        }
                    }
                    Envelope::Event { payload } => {
                        if let Some(cb) = shared.on_event.lock().as_ref() {
                            cb(payload);
                        }
                    }
                    Envelope::Transfer { id: None, message, items } => {
                        if let Some(cb) = shared.on_transfer.lock().as_ref() {
                            cb(message, items);
                        } else if let Some(cb) = shared.on_event.lock().as_ref() {
                            cb(message);
                        }
                    }
                    Envelope::UnhandledError(e) => {
                        warn!(thread = %shared.id, error = %e.message, "unhandled worker error");
                        if let Some(cb) = shared.on_error.lock().as_ref() {
                            cb(&Error::from(e));
                        }
                    }
                    Envelope::ClosedGracefully => {
                        debug!(thread = %shared.id, "worker closed gracefully");
                        reject_all_pending(&shared, "closed gracefully");
                        if let Some(cb) = shared.on_close.lock().as_ref() {
                            cb();
                        }
                    }
                    Envelope::Init { .. }
                    | Envelope::Work { .. }
                    | Envelope::Share { .. }
                    | Envelope::Transfer { id: Some(_), .. }
                    | Envelope::Close => {
                        warn!(thread = %shared.id, "parent received a worker-only envelope, ignoring");
                    }
                }
            }
            reject_all_pending(&shared, "thread channel closed");
        })
        .expect("failed to spawn thread reader")
}
