//! Structured records produced by mutations.
//!
//! A `Record` is an insertion-ordered mapping from field name to `Value`.
//! Fields whose name starts with the reserved prefix are internal: they travel
//! with the record to callbacks but are never matched against triggers.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Default prefix marking a field as internal.
pub const DEFAULT_RESERVED_PREFIX: &str = "_";

/// Ordered field name → value mapping for one namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a field. A replaced field keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.fields.push((name, value));
        None
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All fields, internal ones included, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Fields visible to trigger matching.
    pub fn public_fields<'a>(
        &'a self,
        reserved_prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        self.iter()
            .filter(move |(name, _)| is_public_field(name, reserved_prefix))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Returns true if a field name is matchable under the given prefix.
///
/// An empty prefix makes every non-empty name public.
#[must_use]
pub fn is_public_field(name: &str, reserved_prefix: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    reserved_prefix.is_empty() || !name.starts_with(reserved_prefix)
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

/// Typed domain objects that declare their record fields statically.
///
/// Implement this for a parsed message type and return it from a mutation
/// with `Ok(Some(msg.into_record()))`.
pub trait IntoRecord {
    /// Field names this type produces, in output order.
    const FIELDS: &'static [&'static str];

    /// Convert into a record whose keys are exactly `FIELDS`.
    fn into_record(self) -> Record;
}
