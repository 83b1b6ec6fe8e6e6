//! Typed, bounds-checked views over a [`crate::memory::SharedMemory`]
//! buffer, with an atomic operation surface mirroring JS `Atomics`.

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::memory::{ElementTag, SharedMemory, WaitResult};
use crate::util::clock::Deadline;

/// An element type an `Address` can be typed over.
pub trait Element: Copy + Send + Sync + 'static {
    /// Layout tag identifying this element's width and atomic eligibility.
    const TAG: ElementTag;

    /// Decode this element from a same-width-native byte slice.
    fn from_bytes(bytes: &[u8]) -> Self;
    /// Encode this element into a same-sized byte array.
    fn to_bytes(self) -> Vec<u8>;

    /// Wrapping add, used by `fetch_add`. Only reachable for integer
    /// elements — `Address::require_integer` gates every call site before
    /// it's invoked, so the float impls below never execute their body.
    fn wrapping_add(self, _rhs: Self) -> Self {
        unreachable!("wrapping_add called on a non-integer element")
    }
    /// Wrapping sub, used by `fetch_sub`.
    fn wrapping_sub(self, _rhs: Self) -> Self {
        unreachable!("wrapping_sub called on a non-integer element")
    }
    /// Bitwise and, used by `fetch_and`.
    fn bit_and(self, _rhs: Self) -> Self {
        unreachable!("bit_and called on a non-integer element")
    }
    /// Bitwise or, used by `fetch_or`.
    fn bit_or(self, _rhs: Self) -> Self {
        unreachable!("bit_or called on a non-integer element")
    }
    /// Bitwise xor, used by `fetch_xor`.
    fn bit_xor(self, _rhs: Self) -> Self {
        unreachable!("bit_xor called on a non-integer element")
    }
}

macro_rules! impl_element_int {
    ($t:ty, $tag:expr) => {
        impl Element for $t {
            const TAG: ElementTag = $tag;
            fn from_bytes(bytes: &[u8]) -> Self {
                <$t>::from_ne_bytes(bytes.try_into().expect("width mismatch"))
            }
            fn to_bytes(self) -> Vec<u8> {
                self.to_ne_bytes().to_vec()
            }
            fn wrapping_add(self, rhs: Self) -> Self {
                <$t>::wrapping_add(self, rhs)
            }
            fn wrapping_sub(self, rhs: Self) -> Self {
                <$t>::wrapping_sub(self, rhs)
            }
            fn bit_and(self, rhs: Self) -> Self {
                self & rhs
            }
            fn bit_or(self, rhs: Self) -> Self {
                self | rhs
            }
            fn bit_xor(self, rhs: Self) -> Self {
                self ^ rhs
            }
        }
    };
}

macro_rules! impl_element_float {
    ($t:ty, $tag:expr) => {
        impl Element for $t {
            const TAG: ElementTag = $tag;
            fn from_bytes(bytes: &[u8]) -> Self {
                <$t>::from_ne_bytes(bytes.try_into().expect("width mismatch"))
            }
            fn to_bytes(self) -> Vec<u8> {
                self.to_ne_bytes().to_vec()
            }
        }
    };
}

impl_element_int!(i8, ElementTag::I8);
impl_element_int!(u8, ElementTag::U8);
impl_element_int!(i16, ElementTag::I16);
impl_element_int!(u16, ElementTag::U16);
impl_element_int!(i32, ElementTag::I32);
impl_element_int!(u32, ElementTag::U32);
impl_element_int!(i64, ElementTag::I64);
impl_element_int!(u64, ElementTag::U64);
impl_element_float!(f32, ElementTag::F32);
impl_element_float!(f64, ElementTag::F64);

/// A typed, bounds-checked view over a range of a [`SharedMemory`] buffer.
///
/// Non-atomic `get`/`set` are available for every [`Element`]. The atomic
/// surface (`fetch_*`, `compare_exchange`, `exchange`, `store`, `load`) is
/// only available when `T::TAG.is_integer()`; calling it on a float-backed
/// address fails with [`Error::InvalidLayout`]. `notify`/`wait`/`wait_async`
/// additionally require a 4-byte element (mirroring the real `Atomics.wait`
/// restriction to `Int32Array`); any other width fails with
/// [`Error::WaitNotSupported`].
#[derive(Clone)]
pub struct Address<T: Element> {
    memory: SharedMemory,
    byte_offset: usize,
    count: usize,
    _marker: PhantomData<T>,
}

impl<T: Element> std::fmt::Debug for Address<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Address")
            .field("handle", &self.memory.handle_id())
            .field("byte_offset", &self.byte_offset)
            .field("count", &self.count)
            .finish()
    }
}

impl<T: Element> Address<T> {
    /// Build a view over `memory` starting at `byte_offset` for `count`
    /// elements, failing if the range would run past the buffer's end.
    pub fn new(memory: SharedMemory, byte_offset: usize, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(Error::OutOfBounds("count must be >= 1".into()));
        }
        let end = byte_offset + count * T::TAG.byte_width();
        if end > memory.byte_len() {
            return Err(Error::OutOfBounds(format!(
                "range [{byte_offset}, {end}) exceeds buffer length {}",
                memory.byte_len()
            )));
        }
        Ok(Self {
            memory,
            byte_offset,
            count,
            _marker: PhantomData,
        })
    }

    /// Number of elements this address spans.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Byte offset of element `index` within the backing buffer.
    fn offset_of(&self, index: usize) -> Result<usize> {
        if index >= self.count {
            return Err(Error::OutOfBounds(format!(
                "index {index} out of bounds for count {}",
                self.count
            )));
        }
        Ok(self.byte_offset + index * T::TAG.byte_width())
    }

    fn require_integer(&self) -> Result<()> {
        if T::TAG.is_integer() {
            Ok(())
        } else {
            Err(Error::InvalidLayout(
                "atomic operations require an integer element type".into(),
            ))
        }
    }

    fn require_wait_width(&self) -> Result<()> {
        if T::TAG.byte_width() == 4 {
            Ok(())
        } else {
            Err(Error::WaitNotSupported(
                "wait/notify require a 4-byte (i32/u32) element".into(),
            ))
        }
    }

    /// Non-atomic read.
    pub fn get(&self, index: usize) -> Result<T> {
        let off = self.offset_of(index)?;
        let width = T::TAG.byte_width();
        let mut buf = vec![0u8; width];
        self.memory.read(off, &mut buf);
        Ok(T::from_bytes(&buf))
    }

    /// Non-atomic write.
    pub fn set(&self, index: usize, value: T) -> Result<()> {
        let off = self.offset_of(index)?;
        self.memory.write(off, &value.to_bytes());
        Ok(())
    }

    /// Handle id and byte range, used by dehydration.
    pub(crate) fn raw_parts(&self) -> (u64, usize, usize) {
        (self.memory.handle_id(), self.byte_offset, self.count)
    }

    pub(crate) fn from_raw_parts(handle: u64, byte_offset: usize, count: usize) -> Result<Self> {
        let memory = SharedMemory::by_handle(handle)
            .ok_or_else(|| Error::InvalidOperation(format!("unknown memory handle {handle}")))?;
        Self::new(memory, byte_offset, count)
    }
}

impl<T: Element> Address<T> {
    /// Read one element's worth of bytes at `off`, dispatching on `T`'s own
    /// width instead of assuming 4 bytes.
    fn load_raw(&self, off: usize) -> T {
        let width = T::TAG.byte_width();
        self.memory.with_bytes(|b| T::from_bytes(&b[off..off + width]))
    }

    fn store_raw(&self, off: usize, v: T) {
        self.memory.write(off, &v.to_bytes());
    }

    fn rmw_raw(&self, off: usize, f: impl FnOnce(T) -> T) -> T {
        let width = T::TAG.byte_width();
        self.memory.with_bytes_mut(|b| {
            let cur = T::from_bytes(&b[off..off + width]);
            let new = f(cur);
            b[off..off + width].copy_from_slice(&new.to_bytes());
            cur
        })
    }

    /// `*addr += value`, returning the previous value.
    pub fn fetch_add(&self, index: usize, value: T) -> Result<T> {
        self.require_integer()?;
        let off = self.offset_of(index)?;
        Ok(self.rmw_raw(off, |c| c.wrapping_add(value)))
    }

    /// `*addr -= value`, returning the previous value.
    pub fn fetch_sub(&self, index: usize, value: T) -> Result<T> {
        self.require_integer()?;
        let off = self.offset_of(index)?;
        Ok(self.rmw_raw(off, |c| c.wrapping_sub(value)))
    }

    /// `*addr &= value`, returning the previous value.
    pub fn fetch_and(&self, index: usize, value: T) -> Result<T> {
        self.require_integer()?;
        let off = self.offset_of(index)?;
        Ok(self.rmw_raw(off, |c| c.bit_and(value)))
    }

    /// `*addr |= value`, returning the previous value.
    pub fn fetch_or(&self, index: usize, value: T) -> Result<T> {
        self.require_integer()?;
        let off = self.offset_of(index)?;
        Ok(self.rmw_raw(off, |c| c.bit_or(value)))
    }

    /// `*addr ^= value`, returning the previous value.
    pub fn fetch_xor(&self, index: usize, value: T) -> Result<T> {
        self.require_integer()?;
        let off = self.offset_of(index)?;
        Ok(self.rmw_raw(off, |c| c.bit_xor(value)))
    }

    /// If `*addr == expected`, set it to `new`. Returns the value observed
    /// before the (possibly no-op) write.
    pub fn compare_exchange(&self, index: usize, expected: T, new: T) -> Result<T>
    where
        T: PartialEq,
    {
        self.require_integer()?;
        let off = self.offset_of(index)?;
        Ok(self.rmw_raw(off, |c| if c == expected { new } else { c }))
    }

    /// Unconditionally set `*addr = new`, returning the previous value.
    pub fn exchange(&self, index: usize, new: T) -> Result<T> {
        self.require_integer()?;
        let off = self.offset_of(index)?;
        Ok(self.rmw_raw(off, |_| new))
    }

    /// Atomic store (same bytes as `set`, but goes through the integer
    /// gate and bumps the generation counter so waiters re-check).
    pub fn store(&self, index: usize, value: T) -> Result<()> {
        self.require_integer()?;
        let off = self.offset_of(index)?;
        self.store_raw(off, value);
        Ok(())
    }

    /// Atomic load.
    pub fn load(&self, index: usize) -> Result<T> {
        self.require_integer()?;
        let off = self.offset_of(index)?;
        Ok(self.load_raw(off))
    }

    /// Wake up to `count` threads blocked in `wait`/`wait_async` on this
    /// address.
    pub fn notify(&self, index: usize, count: u32) -> Result<u32> {
        self.require_wait_width()?;
        self.offset_of(index)?;
        Ok(self.memory.notify(count))
    }

    /// Convenience for `notify(index, 1)`.
    pub fn notify_one(&self, index: usize) -> Result<u32> {
        self.notify(index, 1)
    }

    /// Convenience for `notify(index, u32::MAX)`.
    pub fn notify_all(&self, index: usize) -> Result<u32> {
        self.notify(index, u32::MAX)
    }

    /// Block the current thread until `*addr != expected` or `timeout`
    /// elapses. `None` blocks indefinitely.
    pub fn wait(&self, index: usize, expected: i32, timeout: Option<Duration>) -> Result<WaitResult> {
        self.require_wait_width()?;
        let off = self.offset_of(index)?;
        Ok(self.memory.wait_i32(off, expected, Deadline::from_timeout(timeout)))
    }

    /// Future-returning variant of [`Address::wait`], bridged through
    /// `spawn_blocking` so it never blocks the calling async task's
    /// executor thread.
    pub fn wait_async(
        &self,
        index: usize,
        expected: i32,
        timeout: Option<Duration>,
    ) -> Result<impl Future<Output = Result<WaitResult>> + Send + 'static> {
        self.require_wait_width()?;
        let off = self.offset_of(index)?;
        let memory = self.memory.clone();
        Ok(async move {
            tokio::task::spawn_blocking(move || {
                memory.wait_i32(off, expected, Deadline::from_timeout(timeout))
            })
            .await
            .map_err(|e| Error::InvalidOperation(format!("wait_async join error: {e}")))
        })
    }
}

impl<T: Element> Serialize for Address<T> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let (handle, offset, count) = self.raw_parts();
        crate::hydrate::DehydratedAddress {
            memory: handle,
            offset,
            cnt: count,
            tag: format!("{:?}", T::TAG),
        }
        .serialize(serializer)
    }
}

impl<'de, T: Element> Deserialize<'de> for Address<T> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = crate::hydrate::DehydratedAddress::deserialize(deserializer)?;
        Self::from_raw_parts(raw.memory, raw.offset, raw.cnt).map_err(serde::de::Error::custom)
    }
}
