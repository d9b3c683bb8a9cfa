//! Trigger specifications and the trigger registry.
//!
//! A trigger is a namespace, a mapping of required field → expected value, and
//! a callback. Its id is derived from the namespace and the requirement mapping,
//! so registering the same mapping twice yields the same id and one effective
//! trigger. The registry keeps a reverse index from field name to the triggers
//! that require it, which keeps per-line matching proportional to the fields
//! actually referenced by some trigger.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BoxError, ConfigurationError};
use crate::namespace::{Namespace, NamespaceRegistry};
use crate::record::{is_public_field, Record};
use crate::state::NamespaceState;
use crate::value::Value;

/// Required field name → expected value. Sorted, so equal mappings compare and
/// hash identically regardless of construction order.
pub type Requirements = BTreeMap<String, Value>;

/// Callback invoked when a trigger is satisfied.
pub type CallbackFn = dyn Fn(&Record, &mut NamespaceState) -> Result<(), BoxError> + Send + Sync;

// UUID v5 namespace for trigger ids.
const TRIGGER_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_54c2_3a0e_4d8f_9c71_2e5a_b4d0_1f37);

/// Content-derived identifier for a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(Uuid);

impl TriggerId {
    /// Derive the id for a (namespace, requirements) pair.
    ///
    /// Mappings that compare equal get equal ids: `0.0` and `-0.0` collapse,
    /// every other float keeps its own bit pattern.
    #[must_use]
    pub fn derive(namespace: &Namespace, requirements: &Requirements) -> Self {
        let mut canonical = Vec::with_capacity(64);
        write_str(&mut canonical, namespace.as_str());
        write_len(&mut canonical, requirements.len());
        for (field, value) in requirements {
            write_str(&mut canonical, field);
            write_value(&mut canonical, value);
        }
        Self(Uuid::new_v5(&TRIGGER_ID_NAMESPACE, &canonical))
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_le_bytes());
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_len(out, s.len());
    out.extend_from_slice(s.as_bytes());
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.push(0),
        Value::Bool(b) => out.extend_from_slice(&[1, u8::from(*b)]),
        Value::Int(i) => {
            out.push(2);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            out.push(3);
            let bits = if *f == 0.0 { 0 } else { f.to_bits() };
            out.extend_from_slice(&bits.to_le_bytes());
        }
        Value::String(s) => {
            out.push(4);
            write_str(out, s);
        }
        Value::List(items) => {
            out.push(5);
            write_len(out, items.len());
            for item in items {
                write_value(out, item);
            }
        }
        Value::Structured(json) => {
            out.push(6);
            write_str(out, &json.to_string());
        }
    }
}

fn contains_nan(value: &Value) -> bool {
    match value {
        Value::Float(f) => f.is_nan(),
        Value::List(items) => items.iter().any(contains_nan),
        _ => false,
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered trigger.
#[derive(Clone)]
pub struct TriggerSpec {
    id: TriggerId,
    namespace: Namespace,
    requirements: Requirements,
    seq: u64,
    callback: Arc<CallbackFn>,
}

impl TriggerSpec {
    #[must_use]
    pub const fn id(&self) -> TriggerId {
        self.id
    }

    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    #[must_use]
    pub fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    /// Registration order; smaller fires first on ties.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn callback(&self) -> &Arc<CallbackFn> {
        &self.callback
    }
}

impl fmt::Debug for TriggerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerSpec")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("requirements", &self.requirements)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// Trigger storage plus the field-name reverse index.
#[derive(Debug, Default)]
pub struct TriggerRegistry {
    specs: HashMap<TriggerId, TriggerSpec>,
    by_field: HashMap<String, Vec<TriggerId>>,
    unconditional: HashMap<Namespace, Vec<TriggerId>>,
    next_seq: u64,
}

impl TriggerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trigger and return its id.
    ///
    /// Re-registering an identical (namespace, requirements) pair replaces the
    /// callback but keeps the original registration order and index entries.
    pub fn add(
        &mut self,
        namespaces: &NamespaceRegistry,
        reserved_prefix: &str,
        namespace: Namespace,
        requirements: Requirements,
        callback: Arc<CallbackFn>,
    ) -> Result<TriggerId, ConfigurationError> {
        if !namespaces.is_registered(&namespace) {
            return Err(ConfigurationError::UnknownNamespace { namespace });
        }
        for field in requirements.keys() {
            if field.is_empty() {
                return Err(ConfigurationError::InvalidRequirement {
                    field: field.clone(),
                    reason: "field name cannot be empty".to_string(),
                });
            }
            if !is_public_field(field, reserved_prefix) {
                return Err(ConfigurationError::InvalidRequirement {
                    field: field.clone(),
                    reason: format!("fields starting with '{reserved_prefix}' are internal"),
                });
            }
        }
        if let Some((field, _)) = requirements.iter().find(|(_, v)| contains_nan(v)) {
            return Err(ConfigurationError::InvalidRequirement {
                field: field.clone(),
                reason: "NaN never equals an observed value".to_string(),
            });
        }

        let id = TriggerId::derive(&namespace, &requirements);
        if let Some(existing) = self.specs.get_mut(&id) {
            tracing::debug!(trigger_id = %id, namespace = %namespace, "replacing callback of existing trigger");
            existing.callback = callback;
            return Ok(id);
        }

        if requirements.is_empty() {
            self.unconditional.entry(namespace.clone()).or_default().push(id);
        } else {
            for field in requirements.keys() {
                self.by_field.entry(field.clone()).or_default().push(id);
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.specs.insert(
            id,
            TriggerSpec {
                id,
                namespace,
                requirements,
                seq,
                callback,
            },
        );
        Ok(id)
    }

    /// Triggers requiring `field`, in registration order.
    #[must_use]
    pub fn candidates_for(&self, field: &str) -> &[TriggerId] {
        self.by_field.get(field).map_or(&[][..], Vec::as_slice)
    }

    /// Triggers of `namespace` with an empty requirement mapping.
    #[must_use]
    pub fn unconditional_for(&self, namespace: &Namespace) -> &[TriggerId] {
        self.unconditional.get(namespace).map_or(&[][..], Vec::as_slice)
    }

    #[must_use]
    pub fn get(&self, id: TriggerId) -> Option<&TriggerSpec> {
        self.specs.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
