//! Wire-format helper types shared by the hydration registry and the
//! parent/worker envelope codec.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The on-the-wire shape of a dehydrated primitive or error, matching the
/// `{"__dehydrated": true, "__type": ..., "__value": ...}` envelope every
/// built-in and registered type round-trips through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DehydratedForm {
    /// Always `true`; present so a generic `Value` can be recognized as a
    /// dehydrated form without knowing its `__type` in advance.
    #[serde(rename = "__dehydrated")]
    pub dehydrated: bool,
    /// Registry key identifying how to hydrate `value`.
    #[serde(rename = "__type")]
    pub type_key: String,
    /// The type-specific payload.
    #[serde(rename = "__value")]
    pub value: Value,
}

impl DehydratedForm {
    /// Build a dehydrated form for `type_key` wrapping `value`.
    #[must_use]
    pub fn new(type_key: impl Into<String>, value: Value) -> Self {
        Self {
            dehydrated: true,
            type_key: type_key.into(),
            value,
        }
    }

    /// Parse `v` as a dehydrated form, if it looks like one.
    #[must_use]
    pub fn from_value(v: &Value) -> Option<Self> {
        let obj = v.as_object()?;
        if obj.get("__dehydrated").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        serde_json::from_value(v.clone()).ok()
    }

    /// Serialize back into a generic `Value`.
    #[must_use]
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Identifies a live `SharedMemory` allocation for dehydration/hydration of
/// `Address` values within a single process.
pub type MemoryHandleId = u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_value() {
        let form = DehydratedForm::new("mutex", serde_json::json!({"addr": 1}));
        let v = form.clone().into_value();
        let parsed = DehydratedForm::from_value(&v).unwrap();
        assert_eq!(parsed.type_key, "mutex");
    }

    #[test]
    fn rejects_plain_values() {
        let v = serde_json::json!({"foo": "bar"});
        assert!(DehydratedForm::from_value(&v).is_none());
    }
}
