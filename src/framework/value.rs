use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Placeholder used in planned documents for values only the API can provide.
pub const UNKNOWN: &str = "(known after apply)";

/// A Terraform attribute value: absent, not yet known, or known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value<T> {
    Value(T),
    Null,
    Unknown,
}

impl<T> Default for Value<T> {
    fn default() -> Self {
        Value::Null
    }
}

impl<T> Value<T> {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Value::Unknown)
    }

    /// True only when an actual value is present.
    pub fn is_known(&self) -> bool {
        matches!(self, Value::Value(_))
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            Value::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Value::Value(v),
            None => Value::Null,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Value<U> {
        match self {
            Value::Value(v) => Value::Value(f(v)),
            Value::Null => Value::Null,
            Value::Unknown => Value::Unknown,
        }
    }
}

impl<T: Clone> Value<T> {
    pub fn value_or(&self, default: T) -> T {
        self.as_option().cloned().unwrap_or(default)
    }
}

impl<T: Default + Clone> Value<T> {
    /// Go-style zero value for null and unknown.
    pub fn value_or_default(&self) -> T {
        self.as_option().cloned().unwrap_or_default()
    }
}

impl<T> From<T> for Value<T> {
    fn from(value: T) -> Self {
        Value::Value(value)
    }
}

impl<T: Serialize> Serialize for Value<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Value(v) => v.serialize(serializer),
            Value::Null => serializer.serialize_none(),
            Value::Unknown => serializer.serialize_str(UNKNOWN),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Value<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        match raw {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::String(ref s) if s == UNKNOWN => Ok(Value::Unknown),
            other => serde_json::from_value(other)
                .map(Value::Value)
                .map_err(serde::de::Error::custom),
        }
    }
}

pub fn is_unknown_json(value: &serde_json::Value) -> bool {
    value.as_str() == Some(UNKNOWN)
}

pub fn string_value_or_null(s: &str) -> Value<String> {
    if s.is_empty() {
        Value::Null
    } else {
        Value::Value(s.to_string())
    }
}

pub fn int_value_or_null<I: Into<i64> + Copy>(i: Option<I>) -> Value<i64> {
    Value::from_option(i.map(Into::into))
}

pub fn list_value_or_null<T>(items: Vec<T>) -> Value<Vec<T>> {
    if items.is_empty() {
        Value::Null
    } else {
        Value::Value(items)
    }
}

pub fn set_value_or_null<T: Ord>(items: impl IntoIterator<Item = T>) -> Value<BTreeSet<T>> {
    let set: BTreeSet<T> = items.into_iter().collect();
    if set.is_empty() {
        Value::Null
    } else {
        Value::Value(set)
    }
}

pub fn map_value_or_null<V>(items: BTreeMap<String, V>) -> Value<BTreeMap<String, V>> {
    if items.is_empty() {
        Value::Null
    } else {
        Value::Value(items)
    }
}
