//! Auxiliary state metadata
//!
//! [`Info`] carries timing, provenance and failure markers alongside samples.
//! It never affects correctness, and merging is additive so concurrent
//! branches can be reconciled in any declared order.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::BTreeMap;

/// Ordered key/value metadata attached to states and samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Info {
    entries: BTreeMap<String, Value>,
}

impl Info {
    /// Create empty metadata
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Append a value to the array stored under `key`
    ///
    /// A missing key starts a new array; a non-array value is wrapped first.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let slot = self
            .entries
            .entry(key.into())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            let previous = slot.take();
            *slot = Value::Array(vec![previous]);
        }
        if let Value::Array(items) = slot {
            items.push(value.into());
        }
    }

    /// Get value by key
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Remove value by key
    #[inline]
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Check if key exists
    #[inline]
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if metadata is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Merge `other` into `self`
    ///
    /// Keys are unioned. On collision numbers are summed, arrays are
    /// concatenated, objects are merged recursively and anything else keeps
    /// the value already present in `self`.
    pub fn merge(&mut self, other: &Info) {
        for (key, value) in &other.entries {
            match self.entries.get_mut(key) {
                Some(existing) => merge_value(existing, value),
                None => {
                    self.entries.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Consuming form of [`Info::merge`]
    #[must_use]
    pub fn merged(mut self, other: &Info) -> Self {
        self.merge(other);
        self
    }
}

impl FromIterator<(String, Value)> for Info {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

fn merge_value(left: &mut Value, right: &Value) {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            if let Some(sum) = add_numbers(a, b) {
                *a = sum;
            }
        }
        (Value::Array(a), Value::Array(b)) => a.extend(b.iter().cloned()),
        (Value::Object(a), Value::Object(b)) => {
            for (key, value) in b {
                match a.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        a.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        _ => {}
    }
}

fn add_numbers(a: &Number, b: &Number) -> Option<Number> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.checked_add(y).map(Number::from);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.checked_add(y).map(Number::from);
    }
    Number::from_f64(a.as_f64()? + b.as_f64()?)
}
