//! Per-namespace persistent state.
//!
//! The engine owns one `StateStore`. Each namespace gets a `NamespaceState`
//! the first time it is referenced; the state outlives individual `process`
//! calls and is handed to trigger callbacks as `&mut NamespaceState`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::namespace::Namespace;
use crate::value::Value;

/// Key/value memory for one namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceState {
    values: HashMap<String, Value>,
}

impl NamespaceState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Set `key`, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Integer counter helper: adds `delta` to `key` (missing or non-int counts
    /// as zero) and returns the new value.
    pub fn increment(&mut self, key: &str, delta: i64) -> i64 {
        let current = self.get(key).and_then(Value::as_int).unwrap_or(0);
        let next = current.saturating_add(delta);
        self.set(key, next);
        next
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One `NamespaceState` per namespace, created lazily.
#[derive(Debug, Default)]
pub struct StateStore {
    slots: HashMap<Namespace, NamespaceState>,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State for `namespace`, creating an empty one on first access.
    pub fn get(&mut self, namespace: &Namespace) -> &mut NamespaceState {
        self.slots.entry(namespace.clone()).or_default()
    }

    /// Read-only lookup that never creates a slot.
    #[must_use]
    pub fn peek(&self, namespace: &Namespace) -> Option<&NamespaceState> {
        self.slots.get(namespace)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
