//! Dynamic dehydration registry: the runtime analogue of
//! `registerDeHydration` for types only known at runtime, dispatched on
//! `TypeId` instead of `instanceof`.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::OnceLock;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};

/// One entry in the dynamic registry: how to recognize, dehydrate, and
/// hydrate one extension type.
pub struct DehydrationEntry {
    /// Unique key stored under `__type` in the dehydrated form.
    pub key: String,
    /// `TypeId` this entry claims, used by [`dehydrate_value`]'s `isa`
    /// check.
    pub type_id: TypeId,
    /// Encode a concrete instance (already downcast) into its `__value`.
    pub dehydrate: fn(&(dyn Any + Send + Sync)) -> Value,
    /// Decode a `__value` back into a boxed instance.
    pub hydrate: fn(Value) -> Result<Box<dyn Any + Send + Sync>>,
}

struct Registry {
    entries: Vec<DehydrationEntry>,
    keys: HashSet<String>,
}

fn registry() -> &'static RwLock<Registry> {
    static REG: OnceLock<RwLock<Registry>> = OnceLock::new();
    REG.get_or_init(|| {
        RwLock::new(Registry {
            entries: Vec::new(),
            keys: HashSet::new(),
        })
    })
}

/// Register a new dynamic dehydration entry. Fails with
/// [`Error::InvalidRegistration`] if `entry.key` is already registered.
pub fn register_dehydration(entry: DehydrationEntry) -> Result<()> {
    let mut reg = registry().write();
    if !reg.keys.insert(entry.key.clone()) {
        return Err(Error::InvalidRegistration(format!(
            "dehydration key `{}` already registered",
            entry.key
        )));
    }
    reg.entries.push(entry);
    Ok(())
}

/// Result of attempting to dehydrate a type-erased value through the
/// dynamic registry.
pub enum DehydrateOutcome {
    /// A registered entry claimed this value; `key`/`value` form the
    /// dehydrated payload.
    Found {
        /// Registry key of the matching entry.
        key: String,
        /// Encoded `__value`.
        value: Value,
    },
    /// No registered entry recognized this value's type.
    Unrecognized,
}

/// Walk the registry newest-registration-first looking for an entry whose
/// `type_id` matches `value`'s concrete type.
#[must_use]
pub fn dehydrate_value(value: &(dyn Any + Send + Sync)) -> DehydrateOutcome {
    let reg = registry().read();
    let tid = value.type_id();
    for entry in reg.entries.iter().rev() {
        if entry.type_id == tid {
            return DehydrateOutcome::Found {
                key: entry.key.clone(),
                value: (entry.dehydrate)(value),
            };
        }
    }
    DehydrateOutcome::Unrecognized
}

/// Result of attempting to hydrate a `(key, value)` pair through the
/// dynamic registry.
pub enum HydrateOutcome {
    /// `key` matched a registered entry and hydration succeeded.
    Found(Box<dyn Any + Send + Sync>),
    /// `key` is not registered; the raw value is returned unhydrated, and
    /// a warning is logged (matching the "unknown key -> log and return
    /// original" rule).
    Unknown(Value),
}

/// Walk the registry in registration order looking for `key`.
#[must_use]
pub fn hydrate_value(key: &str, value: Value) -> HydrateOutcome {
    let reg = registry().read();
    for entry in &reg.entries {
        if entry.key == key {
            return match (entry.hydrate)(value.clone()) {
                Ok(boxed) => HydrateOutcome::Found(boxed),
                Err(e) => {
                    warn!(key, error = %e, "dehydration entry failed to hydrate value");
                    HydrateOutcome::Unknown(value)
                }
            };
        }
    }
    warn!(key, "no dehydration entry registered for key, returning raw value");
    HydrateOutcome::Unknown(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    fn install() {
        let _ = register_dehydration(DehydrationEntry {
            key: "test::point".into(),
            type_id: TypeId::of::<Point>(),
            dehydrate: |v| {
                let p = v.downcast_ref::<Point>().unwrap();
                serde_json::json!({"x": p.x, "y": p.y})
            },
            hydrate: |v| {
                let x = v["x"].as_i64().unwrap() as i32;
                let y = v["y"].as_i64().unwrap() as i32;
                Ok(Box::new(Point { x, y }))
            },
        });
    }

    #[test]
    fn round_trips_registered_type() {
        install();
        let p: Box<dyn Any + Send + Sync> = Box::new(Point { x: 1, y: 2 });
        let outcome = dehydrate_value(p.as_ref());
        let (key, value) = match outcome {
            DehydrateOutcome::Found { key, value } => (key, value),
            DehydrateOutcome::Unrecognized => panic!("expected a match"),
        };
        assert_eq!(key, "test::point");
        match hydrate_value(&key, value) {
            HydrateOutcome::Found(boxed) => {
                let p2 = boxed.downcast::<Point>().unwrap();
                assert_eq!(*p2, Point { x: 1, y: 2 });
            }
            HydrateOutcome::Unknown(_) => panic!("expected a hydrated value"),
        }
    }

    #[test]
    fn unknown_key_returns_raw_value() {
        let v = serde_json::json!({"a": 1});
        match hydrate_value("nonexistent::key", v.clone()) {
            HydrateOutcome::Unknown(raw) => assert_eq!(raw, v),
            HydrateOutcome::Found(_) => panic!("should not have matched"),
        }
    }

    #[test]
    fn duplicate_key_registration_fails() {
        let dup = || DehydrationEntry {
            key: "test::dup".into(),
            type_id: TypeId::of::<Point>(),
            dehydrate: |_| Value::Null,
            hydrate: |v| Ok(Box::new(v)),
        };
        register_dehydration(dup()).unwrap();
        assert!(register_dehydration(dup()).is_err());
    }
}
