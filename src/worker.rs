//! The worker-side dispatch loop: classifies incoming envelopes, drives
//! user handlers on a dedicated single-threaded Tokio runtime, and manages
//! graceful and idle close.

/// Runtime registration of worker-side handlers by name.
pub mod registry;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{Envelope, TransferItem, WireError};
use crate::thread::ThreadId;

/// Handler slots a worker installs for the lifetime of its dispatch loop.
/// The Rust analogue of assigning `oninit`/`onwork`/`onevent`/`onshare`/
/// `ontransfer`/`onclose` in the distilled protocol.
#[async_trait]
pub trait WorkerHandlers: Send + 'static {
    /// Run once, before any other envelope is dispatched.
    async fn oninit(&mut self, _init: Value) -> Result<()> {
        Ok(())
    }

    /// Handle a unit of dispatched work, returning its result.
    async fn onwork(&mut self, payload: Value) -> Result<Value>;

    /// Handle a fire-and-forget event. Defaults to ignoring unknown
    /// events.
    async fn onevent(&mut self, _payload: Value) -> Result<()> {
        Ok(())
    }

    /// Handle a shared resource. Falls back to `onevent` (with `item` and
    /// `message` merged into one payload) when not overridden, matching
    /// `Work`'s `onwork` (else `onevent`) fallback.
    async fn onshare(&mut self, item: Value, message: Value) -> Result<()> {
        self.onevent(serde_json::json!({ "share": item, "message": message }))
            .await
    }

    /// Handle a transfer of owned items. Falls back to `onevent` with just
    /// `message` when not overridden — `items` are worker-local
    /// transferables, not values a generic event payload can carry.
    async fn ontransfer(&mut self, message: Value, _items: Vec<TransferItem>) -> Result<()> {
        self.onevent(message).await
    }

    /// Run during graceful close, after in-flight work has drained.
    async fn onclose(&mut self) {}
}

struct WorkerContext {
    thread_id: ThreadId,
    messages_processing: Arc<AtomicU32>,
    to_parent: Sender<Envelope>,
}

thread_local! {
    static CONTEXT: std::cell::RefCell<Option<WorkerContext>> = const { std::cell::RefCell::new(None) };
}

/// The id of the thread running this call, if any.
pub fn cur_thread() -> Result<ThreadId> {
    CONTEXT.with(|c| {
        c.borrow()
            .as_ref()
            .map(|ctx| ctx.thread_id.clone())
            .ok_or(Error::NotInWorker)
    })
}

/// How many messages this worker is currently dispatching (normally 0 or
/// 1, since each worker is single-threaded and cooperative; briefly >1
/// while a handler's own future drives nested work).
pub fn num_messages_processing() -> Result<u32> {
    CONTEXT.with(|c| {
        c.borrow()
            .as_ref()
            .map(|ctx| ctx.messages_processing.load(Ordering::SeqCst))
            .ok_or(Error::NotInWorker)
    })
}

/// Send an unsolicited transfer back to the parent.
pub fn transfer(message: Value, items: Vec<TransferItem>) -> Result<()> {
    CONTEXT.with(|c| {
        let ctx = c.borrow();
        let ctx = ctx.as_ref().ok_or(Error::NotInWorker)?;
        ctx.to_parent
            .send(Envelope::Transfer { id: None, message, items })
            .map_err(|_| Error::ThreadStopped("parent channel closed".into()))
    })
}

/// Report an error the worker could not attribute to a specific pending
/// request.
pub fn send_error(err: &Error) -> Result<()> {
    CONTEXT.with(|c| {
        let ctx = c.borrow();
        let ctx = ctx.as_ref().ok_or(Error::NotInWorker)?;
        ctx.to_parent
            .send(Envelope::UnhandledError(WireError::from(err)))
            .map_err(|_| Error::ThreadStopped("parent channel closed".into()))
    })
}

const GRACEFUL_CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const GRACEFUL_CLOSE_MAX_POLLS: u32 = 10;

/// Drive the dispatch loop for one worker until its channel closes or it
/// is told to close. Runs on the dedicated worker OS thread.
pub(crate) fn run_dispatch_loop(
    mut handlers: Box<dyn WorkerHandlers>,
    thread_id: ThreadId,
    to_parent: Sender<Envelope>,
    from_parent: Receiver<Envelope>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            warn!(error = %e, "failed to build worker runtime");
            let _ = to_parent.send(Envelope::Initd(Err(WireError::new(
                "InitializationFailed",
                e.to_string(),
            ))));
            return;
        }
    };

    let messages_processing = Arc::new(AtomicU32::new(0));
    CONTEXT.with(|c| {
        *c.borrow_mut() = Some(WorkerContext {
            thread_id: thread_id.clone(),
            messages_processing: Arc::clone(&messages_processing),
            to_parent: to_parent.clone(),
        });
    });

    let mut idle_timeout: Option<Duration> = None;

    loop {
        let recv_result = if idle_timeout.is_some() && messages_processing.load(Ordering::SeqCst) == 0 {
            from_parent.recv_timeout(idle_timeout.unwrap())
        } else {
            from_parent.recv().map_err(|_| RecvTimeoutError::Disconnected)
        };

        let envelope = match recv_result {
            Ok(e) => e,
            Err(RecvTimeoutError::Timeout) => {
                debug!(thread = %thread_id, "idle timeout elapsed, closing");
                graceful_close(&mut handlers, &rt, &to_parent);
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        messages_processing.fetch_add(1, Ordering::SeqCst);
        let mut should_stop = false;

        match envelope {
            Envelope::Init { init, close_when_idle } => {
                idle_timeout = close_when_idle;
                let res = rt.block_on(handlers.oninit(init));
                let reply = res.as_ref().err().map(WireError::from);
                let _ = to_parent.send(Envelope::Initd(match reply {
                    Some(e) => Err(e),
                    None => Ok(()),
                }));
                if res.is_err() {
                    should_stop = true;
                }
            }
            Envelope::Work { id, payload } => {
                let result = rt
                    .block_on(handlers.onwork(payload))
                    .map_err(|e| WireError::from(&e));
                let _ = to_parent.send(Envelope::WorkResult { id, result });
            }
            Envelope::Event { payload } => {
                if let Err(e) = rt.block_on(handlers.onevent(payload)) {
                    let _ = to_parent.send(Envelope::UnhandledError(WireError::from(&e)));
                }
            }
            Envelope::Share { id, item, message } => {
                let result = rt
                    .block_on(handlers.onshare(item, message))
                    .map_err(|e| WireError::from(&e));
                let _ = to_parent.send(Envelope::Shared { id, result });
            }
            Envelope::Transfer { id: Some(id), message, items } => {
                let result = rt
                    .block_on(handlers.ontransfer(message, items))
                    .map_err(|e| WireError::from(&e));
                let _ = to_parent.send(Envelope::Transferd { id, result });
            }
            Envelope::Transfer { id: None, message, items } => {
                let _ = rt.block_on(handlers.ontransfer(message, items));
            }
            Envelope::Close => {
                graceful_close(&mut handlers, &rt, &to_parent);
                should_stop = true;
            }
            Envelope::Initd(_)
            | Envelope::WorkResult { .. }
            | Envelope::Shared { .. }
            | Envelope::Transferd { .. }
            | Envelope::ClosedGracefully
            | Envelope::UnhandledError(_) => {
                warn!(thread = %thread_id, "worker received a parent-only envelope, ignoring");
            }
        }

        messages_processing.fetch_sub(1, Ordering::SeqCst);
        if should_stop {
            break;
        }
    }

    CONTEXT.with(|c| *c.borrow_mut() = None);
}

fn graceful_close(
    handlers: &mut Box<dyn WorkerHandlers>,
    rt: &tokio::runtime::Runtime,
    to_parent: &Sender<Envelope>,
) {
    let _ = to_parent.send(Envelope::ClosedGracefully);
    // Single-threaded-per-worker dispatch means nothing else can be
    // in flight at this point (the envelope that triggered close is the
    // only one this loop is ever processing concurrently with itself);
    // the poll budget exists for the async handler case, where `onclose`
    // or the closing envelope's own handler may still be settling a
    // spawned subtask.
    for _ in 0..GRACEFUL_CLOSE_MAX_POLLS {
        if rt.metrics().num_alive_tasks() == 0 {
            break;
        }
        std::thread::sleep(GRACEFUL_CLOSE_POLL_INTERVAL);
    }
    rt.block_on(handlers.onclose());
}
