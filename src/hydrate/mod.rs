//! (De)hydration: transparent encode/decode of primitive instances across
//! the parent/worker message boundary.
//!
//! Every built-in type (`Address<T>`, the five sync primitives,
//! [`crate::error::Error`]) round-trips through an ordinary `serde`
//! `Serialize`/`Deserialize` impl that emits/parses the
//! `{"__dehydrated": true, "__type": ..., "__value": ...}` envelope — this
//! is the path every `work`/`init`/`event` payload takes automatically,
//! since serde's own recursive (de)serialization visits nested primitives
//! for free.
//!
//! The [`registry`] submodule additionally mirrors the spec's runtime
//! `registerDeHydration` extension point for types that are only known at
//! runtime (not through a static `Deserialize` impl) and need to travel
//! inside a generic `serde_json::Value` tree.

/// The dynamic, runtime-populated dehydration registry.
pub mod registry;

use serde::{Deserialize, Serialize};

pub use registry::{dehydrate_value, hydrate_value, register_dehydration, DehydrationEntry};

/// Raw, type-erased shape of a dehydrated `Address`. Kept separate from the
/// generic [`crate::util::serde::DehydratedForm`] because an `Address`'s
/// payload shape (`memory`/`offset`/`cnt`/`tag`) is fixed, unlike the
/// free-form `__value` of other dehydrated types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DehydratedAddress {
    /// `SharedMemory` handle id this address views.
    pub memory: u64,
    /// Byte offset into that buffer.
    pub offset: usize,
    /// Element count.
    pub cnt: usize,
    /// Debug-formatted element tag, informational only (hydration infers
    /// the real type from `Address<T>`'s own `T`).
    pub tag: String,
}
