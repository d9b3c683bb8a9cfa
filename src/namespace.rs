//! Namespaces and the namespace registry.
//!
//! A namespace names one logical scope of structured data, typically one kind
//! of record a mutation can produce. Every mutation and trigger is attached to
//! a namespace, and the namespace must be registered first.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque namespace identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Creates a namespace identifier.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Namespace {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Namespace {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Set of valid namespaces. Namespaces live for the registry's lifetime.
#[derive(Debug, Default, Clone)]
pub struct NamespaceRegistry {
    order: Vec<Namespace>,
    known: HashSet<Namespace>,
}

impl NamespaceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a namespace. Returns `false` if it was already registered.
    pub fn register(&mut self, namespace: Namespace) -> bool {
        if self.known.contains(&namespace) {
            return false;
        }
        self.known.insert(namespace.clone());
        self.order.push(namespace);
        true
    }

    #[must_use]
    pub fn is_registered(&self, namespace: &Namespace) -> bool {
        self.known.contains(namespace)
    }

    /// Registered namespaces in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Namespace> {
        self.order.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
