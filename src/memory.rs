//! Shared memory buffers: the substrate every [`crate::address::Address`]
//! and sync primitive is allocated on top of.
//!
//! A [`SharedMemory`] is a fixed-size byte buffer guarded by a
//! `parking_lot::Mutex` paired with a `parking_lot::Condvar`, plus a
//! monotonically increasing generation counter bumped on every `notify`.
//! This is the futex emulation this crate uses in place of a real
//! `SharedArrayBuffer` + `Atomics.wait`/`notify`: every waiter blocks on the
//! condvar and re-checks the expected value itself, exactly like a textbook
//! futex wait loop, so spurious wakeups are harmless.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::util::clock::Deadline;
use crate::util::serde::MemoryHandleId;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn registry() -> &'static Mutex<HashMap<MemoryHandleId, SharedMemory>> {
    static REG: OnceLock<Mutex<HashMap<MemoryHandleId, SharedMemory>>> = OnceLock::new();
    REG.get_or_init(|| Mutex::new(HashMap::new()))
}

struct Inner {
    bytes: Mutex<Vec<u8>>,
    condvar: Condvar,
    generation: AtomicU64,
    handle: MemoryHandleId,
}

/// A shared, growable-free byte buffer reachable from any thread holding a
/// clone of the handle. Cloning a `SharedMemory` clones the handle, not the
/// bytes; every clone observes the same underlying buffer.
#[derive(Clone)]
pub struct SharedMemory {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("handle", &self.inner.handle)
            .field("len", &self.byte_len())
            .finish()
    }
}

impl SharedMemory {
    /// Allocate a new zeroed buffer of `len` bytes and register it under a
    /// fresh process-wide handle id.
    #[must_use]
    pub fn new(len: usize) -> Self {
        let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        let mem = Self {
            inner: Arc::new(Inner {
                bytes: Mutex::new(vec![0u8; len]),
                condvar: Condvar::new(),
                generation: AtomicU64::new(0),
                handle,
            }),
        };
        registry().lock().insert(handle, mem.clone());
        mem
    }

    /// The process-wide handle id used to round-trip this buffer through
    /// dehydration.
    #[must_use]
    pub fn handle_id(&self) -> MemoryHandleId {
        self.inner.handle
    }

    /// Look up a previously allocated buffer by handle id (used when
    /// hydrating an `Address`).
    #[must_use]
    pub fn by_handle(id: MemoryHandleId) -> Option<Self> {
        registry().lock().get(&id).cloned()
    }

    /// Size of the buffer in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.inner.bytes.lock().len()
    }

    /// Read `width` bytes at `offset` into `out`. Bounds are the caller's
    /// responsibility; `Address` enforces them before calling in.
    pub(crate) fn read(&self, offset: usize, out: &mut [u8]) {
        let bytes = self.inner.bytes.lock();
        out.copy_from_slice(&bytes[offset..offset + out.len()]);
    }

    pub(crate) fn write(&self, offset: usize, data: &[u8]) {
        let mut bytes = self.inner.bytes.lock();
        bytes[offset..offset + data.len()].copy_from_slice(data);
        drop(bytes);
        self.bump_and_notify_all();
    }

    /// Run `f` with exclusive access to the raw buffer, returning its
    /// result. Used by atomic read-modify-write operations so the whole
    /// step is one critical section.
    pub(crate) fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.inner.bytes.lock();
        let r = f(&mut bytes);
        drop(bytes);
        self.bump_and_notify_all();
        r
    }

    pub(crate) fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let bytes = self.inner.bytes.lock();
        f(&bytes)
    }

    fn bump_and_notify_all(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.condvar.notify_all();
    }

    /// Block until the 4 bytes at `offset` no longer equal `expected`, or
    /// until `deadline` expires. Mirrors `Atomics.wait`: re-checks under the
    /// lock every wakeup (spurious or real) and only returns once the value
    /// has actually changed or time has run out.
    pub(crate) fn wait_i32(
        &self,
        offset: usize,
        expected: i32,
        deadline: Deadline,
    ) -> WaitResult {
        let mut bytes = self.inner.bytes.lock();
        loop {
            let cur = i32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap());
            if cur != expected {
                return WaitResult::NotEqual;
            }
            match deadline.remaining() {
                None => {
                    self.inner.condvar.wait(&mut bytes);
                }
                Some(d) if d.is_zero() => return WaitResult::TimedOut,
                Some(d) => {
                    let timed_out = self.inner.condvar.wait_for(&mut bytes, d).timed_out();
                    if timed_out && deadline.is_expired() {
                        let cur = i32::from_ne_bytes(
                            bytes[offset..offset + 4].try_into().unwrap(),
                        );
                        return if cur == expected {
                            WaitResult::TimedOut
                        } else {
                            WaitResult::Ok
                        };
                    }
                }
            }
        }
    }

    /// Wake up to `count` waiters blocked anywhere on this buffer. This
    /// crate does not track per-offset waiter counts (unlike a real futex);
    /// every notify wakes the whole buffer's condvar and relies on each
    /// waiter re-checking its own offset, so `count` is honored loosely
    /// (it bounds nothing today, but is accepted to match the `Address`
    /// API and to leave room for a future per-offset waiter list).
    pub(crate) fn notify(&self, _count: u32) -> u32 {
        self.bump_and_notify_all();
        0
    }
}

/// Outcome of a blocking wait on an `Address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Woken because the value changed.
    Ok,
    /// The value never matched `expected` to begin with.
    NotEqual,
    /// The timeout elapsed before the value changed.
    TimedOut,
}

/// Pack an `ELEMENT_LAYOUT` into one freshly allocated `SharedMemory`,
/// inserting padding so each item begins at an offset divisible by its own
/// element width (natural alignment). Returns the buffer plus the
/// `(byte_offset, count)` of each item, in layout order.
pub fn alloc(layout: &[LayoutItem]) -> (SharedMemory, Vec<(usize, usize)>) {
    let mut offsets = Vec::with_capacity(layout.len());
    let mut cursor = 0usize;
    for item in layout {
        let width = item.tag.byte_width();
        let pad = (width - (cursor % width)) % width;
        cursor += pad;
        offsets.push((cursor, item.count));
        cursor += width * item.count;
    }
    (SharedMemory::new(cursor), offsets)
}

/// Build a `SharedMemory` + offsets and bounds-check the layout's total
/// size up front, returning [`Error::InvalidLayout`] on an empty item.
pub fn try_alloc(layout: &[LayoutItem]) -> Result<(SharedMemory, Vec<(usize, usize)>)> {
    for item in layout {
        if item.count == 0 {
            return Err(Error::InvalidLayout(
                "layout item count must be >= 1".into(),
            ));
        }
    }
    Ok(alloc(layout))
}

/// One entry in an `ELEMENT_LAYOUT`: an element type and how many of them.
#[derive(Debug, Clone, Copy)]
pub struct LayoutItem {
    /// Element kind, used for width/alignment and atomic-eligibility.
    pub tag: ElementTag,
    /// Number of contiguous elements of this kind.
    pub count: usize,
}

/// Element kinds an `Address` can be typed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementTag {
    /// 8-bit signed integer.
    I8,
    /// 8-bit unsigned integer.
    U8,
    /// 16-bit signed integer.
    I16,
    /// 16-bit unsigned integer.
    U16,
    /// 32-bit signed integer.
    I32,
    /// 32-bit unsigned integer.
    U32,
    /// 64-bit signed integer.
    I64,
    /// 64-bit unsigned integer.
    U64,
    /// 32-bit IEEE float; not atomic-eligible.
    F32,
    /// 64-bit IEEE float; not atomic-eligible.
    F64,
}

impl ElementTag {
    /// Byte width of one element of this kind.
    #[must_use]
    pub const fn byte_width(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// Whether `Address` atomic operations are permitted on this kind.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        !matches!(self, Self::F32 | Self::F64)
    }
}
