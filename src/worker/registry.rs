//! Free-function handler registration: an alternative to implementing
//! [`crate::worker::WorkerHandlers`] directly, for callers that prefer
//! installing individual handler closures by name.

use std::cell::RefCell;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::protocol::TransferItem;
use crate::worker::WorkerHandlers;

type InitFn = dyn Fn(Value) -> Result<()> + Send + Sync;
type WorkFn = dyn Fn(Value) -> Result<Value> + Send + Sync;
type EventFn = dyn Fn(Value) -> Result<()> + Send + Sync;
type ShareFn = dyn Fn(Value, Value) -> Result<()> + Send + Sync;
type TransferFn = dyn Fn(Value, Vec<TransferItem>) -> Result<()> + Send + Sync;
type CloseFn = dyn Fn() + Send + Sync;

/// A single handler to install via [`register_handler`].
pub enum Handler {
    /// Installs `oninit`.
    OnInit(Arc<InitFn>),
    /// Installs `onwork`.
    OnWork(Arc<WorkFn>),
    /// Installs `onevent`.
    OnEvent(Arc<EventFn>),
    /// Installs `onshare`.
    OnShare(Arc<ShareFn>),
    /// Installs `ontransfer`.
    OnTransfer(Arc<TransferFn>),
    /// Installs `onclose`.
    OnClose(Arc<CloseFn>),
}

#[derive(Default)]
struct Slots {
    oninit: Option<Arc<InitFn>>,
    onwork: Option<Arc<WorkFn>>,
    onevent: Option<Arc<EventFn>>,
    onshare: Option<Arc<ShareFn>>,
    ontransfer: Option<Arc<TransferFn>>,
    onclose: Option<Arc<CloseFn>>,
}

thread_local! {
    static SLOTS: RefCell<Slots> = RefCell::new(Slots::default());
}

/// Install `handler` in the calling worker's thread-local slot. Fails
/// with [`Error::NotInWorker`] if called outside a worker's dispatch loop.
pub fn register_handler(handler: Handler) -> Result<()> {
    crate::worker::cur_thread()?;
    SLOTS.with(|s| {
        let mut s = s.borrow_mut();
        match handler {
            Handler::OnInit(f) => s.oninit = Some(f),
            Handler::OnWork(f) => s.onwork = Some(f),
            Handler::OnEvent(f) => s.onevent = Some(f),
            Handler::OnShare(f) => s.onshare = Some(f),
            Handler::OnTransfer(f) => s.ontransfer = Some(f),
            Handler::OnClose(f) => s.onclose = Some(f),
        }
    });
    Ok(())
}

/// A [`WorkerHandlers`] implementation that dispatches to whatever slots
/// [`register_handler`] has installed on the worker's own thread.
#[derive(Default)]
pub struct RegisteredHandlers;

#[async_trait]
impl WorkerHandlers for RegisteredHandlers {
    async fn oninit(&mut self, init: Value) -> Result<()> {
        let f = SLOTS.with(|s| s.borrow().oninit.clone());
        match f {
            Some(f) => f(init),
            None => Ok(()),
        }
    }

    async fn onwork(&mut self, payload: Value) -> Result<Value> {
        let f = SLOTS.with(|s| s.borrow().onwork.clone());
        match f {
            Some(f) => f(payload),
            None => {
                let fallback = SLOTS.with(|s| s.borrow().onevent.clone());
                match fallback {
                    Some(f) => f(payload).map(|()| Value::Null),
                    None => Err(Error::InvalidSystemEvent(
                        "no onwork or onevent handler registered".into(),
                    )),
                }
            }
        }
    }

    async fn onevent(&mut self, payload: Value) -> Result<()> {
        let f = SLOTS.with(|s| s.borrow().onevent.clone());
        match f {
            Some(f) => f(payload),
            None => Ok(()),
        }
    }

    async fn onshare(&mut self, item: Value, message: Value) -> Result<()> {
        let f = SLOTS.with(|s| s.borrow().onshare.clone());
        match f {
            Some(f) => f(item, message),
            None => {
                let fallback = SLOTS.with(|s| s.borrow().onevent.clone());
                match fallback {
                    Some(f) => f(serde_json::json!({ "share": item, "message": message })),
                    None => Ok(()),
                }
            }
        }
    }

    async fn ontransfer(&mut self, message: Value, items: Vec<TransferItem>) -> Result<()> {
        let f = SLOTS.with(|s| s.borrow().ontransfer.clone());
        match f {
            Some(f) => f(message, items),
            None => {
                let fallback = SLOTS.with(|s| s.borrow().onevent.clone());
                match fallback {
                    Some(f) => f(message),
                    None => Ok(()),
                }
            }
        }
    }

    async fn onclose(&mut self) {
        let f = SLOTS.with(|s| s.borrow().onclose.clone());
        if let Some(f) = f {
            f();
        }
    }
}
