//! Mutation pipeline: raw line to namespace-tagged records.
//!
//! Each mutation pairs a namespace with a caller-supplied transform. The
//! pipeline runs every transform on the raw line, in registration order, and
//! collects the records they produce. A transform that fails (returns `Err` or
//! panics) is recorded and skipped; the other transforms still run.

use std::any::TypeId;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{panic_message, BoxError, ConfigurationError, TransformError};
use crate::namespace::{Namespace, NamespaceRegistry};
use crate::record::Record;

/// Transform signature: `Ok(None)` means "no record for this line".
pub type TransformFn = dyn Fn(&str) -> Result<Option<Record>, BoxError> + Send + Sync;

/// A registered (namespace, transform) pair.
#[derive(Clone)]
pub struct Mutation {
    namespace: Namespace,
    transform: Arc<TransformFn>,
    key: Option<TypeId>,
}

impl Mutation {
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn same_as(&self, namespace: &Namespace, transform: &Arc<TransformFn>, key: Option<TypeId>) -> bool {
        if self.namespace != *namespace {
            return false;
        }
        match (self.key, key) {
            (Some(a), Some(b)) => a == b,
            _ => std::ptr::eq(
                Arc::as_ptr(&self.transform).cast::<()>(),
                Arc::as_ptr(transform).cast::<()>(),
            ),
        }
    }
}

impl std::fmt::Debug for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutation")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// Type identity for zero-sized transforms; two values of such a type behave
/// identically.
pub(crate) fn stateless_key<F: 'static>() -> Option<TypeId> {
    (std::mem::size_of::<F>() == 0).then(TypeId::of::<F>)
}

/// Records and failures produced by one pass over the pipeline.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MutationOutput {
    /// At most one record per namespace, ordered by first producing mutation.
    pub records: Vec<(Namespace, Record)>,
    pub failures: Vec<TransformError>,
}

impl MutationOutput {
    fn put(&mut self, namespace: &Namespace, record: Record) {
        if let Some(slot) = self.records.iter_mut().find(|(ns, _)| ns == namespace) {
            slot.1 = record;
        } else {
            self.records.push((namespace.clone(), record));
        }
    }

    #[must_use]
    pub fn record_for(&self, namespace: &Namespace) -> Option<&Record> {
        self.records
            .iter()
            .find(|(ns, _)| ns == namespace)
            .map(|(_, r)| r)
    }
}

/// Ordered collection of mutations.
#[derive(Debug, Default, Clone)]
pub struct MutationPipeline {
    mutations: Vec<Mutation>,
}

impl MutationPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared transform for `namespace`.
    ///
    /// Returns `Ok(false)` when the same `Arc` is already registered for
    /// `namespace`.
    pub fn add(
        &mut self,
        namespaces: &NamespaceRegistry,
        namespace: Namespace,
        transform: Arc<TransformFn>,
    ) -> Result<bool, ConfigurationError> {
        self.insert(namespaces, namespace, transform, None)
    }

    /// Register a transform by value.
    ///
    /// Function items and non-capturing closures are identified by their type,
    /// so adding the same one twice for a namespace returns `Ok(false)`.
    /// Capturing closures cannot be compared and always register anew.
    pub fn add_fn<F>(
        &mut self,
        namespaces: &NamespaceRegistry,
        namespace: Namespace,
        transform: F,
    ) -> Result<bool, ConfigurationError>
    where
        F: Fn(&str) -> Result<Option<Record>, BoxError> + Send + Sync + 'static,
    {
        self.insert(namespaces, namespace, Arc::new(transform), stateless_key::<F>())
    }

    pub(crate) fn insert(
        &mut self,
        namespaces: &NamespaceRegistry,
        namespace: Namespace,
        transform: Arc<TransformFn>,
        key: Option<TypeId>,
    ) -> Result<bool, ConfigurationError> {
        if !namespaces.is_registered(&namespace) {
            return Err(ConfigurationError::UnknownNamespace { namespace });
        }
        if self.mutations.iter().any(|m| m.same_as(&namespace, &transform, key)) {
            return Ok(false);
        }
        self.mutations.push(Mutation {
            namespace,
            transform,
            key,
        });
        Ok(true)
    }

    /// Run every transform against `line`.
    ///
    /// When two mutations of one namespace both produce a record, the later
    /// registration wins.
    #[must_use]
    pub fn apply_all(&self, line: &str) -> MutationOutput {
        let mut out = MutationOutput::default();
        for m in &self.mutations {
            let result = catch_unwind(AssertUnwindSafe(|| (m.transform)(line)));
            match result {
                Ok(Ok(Some(record))) => out.put(&m.namespace, record),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => out.failures.push(TransformError {
                    namespace: m.namespace.clone(),
                    message: e.to_string(),
                }),
                Err(payload) => out.failures.push(TransformError {
                    namespace: m.namespace.clone(),
                    message: panic_message(payload.as_ref()),
                }),
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    type TransformResult = Result<Option<Record>, BoxError>;

    fn registry(names: &[&str]) -> NamespaceRegistry {
        let mut reg = NamespaceRegistry::new();
        for n in names {
            reg.register(Namespace::new(*n));
        }
        reg
    }

    fn first_word(line: &str) -> TransformResult {
        Ok(line
            .split_whitespace()
            .next()
            .map(|w| Record::new().with("event", w)))
    }

    #[test]
    fn add_rejects_unknown_namespace() {
        let reg = registry(&["user"]);
        let mut pipeline = MutationPipeline::new();
        let err = pipeline
            .add(&reg, Namespace::new("channel"), Arc::new(first_word))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownNamespace {
                namespace: Namespace::new("channel")
            }
        );
        assert!(pipeline.is_empty());
    }

    #[test]
    fn duplicate_pair_is_idempotent() {
        let reg = registry(&["user", "channel"]);
        let mut pipeline = MutationPipeline::new();
        let t: Arc<TransformFn> = Arc::new(first_word);
        assert!(pipeline.add(&reg, "user".into(), Arc::clone(&t)).unwrap());
        assert!(!pipeline.add(&reg, "user".into(), Arc::clone(&t)).unwrap());
        assert!(pipeline.add(&reg, "channel".into(), t).unwrap());
        assert_eq!(pipeline.len(), 2);
    }

    #[test]
    fn same_function_by_value_is_idempotent() {
        let reg = registry(&["user", "channel"]);
        let mut pipeline = MutationPipeline::new();
        assert!(pipeline.add_fn(&reg, "user".into(), first_word).unwrap());
        assert!(!pipeline.add_fn(&reg, "user".into(), first_word).unwrap());
        assert!(pipeline.add_fn(&reg, "channel".into(), first_word).unwrap());

        // A capturing closure has state and cannot be compared.
        let tag = String::from("x");
        let tagged = move |_: &str| -> TransformResult { Ok(Some(Record::new().with("tag", tag.as_str()))) };
        assert!(pipeline.add_fn(&reg, "user".into(), tagged.clone()).unwrap());
        assert!(pipeline.add_fn(&reg, "user".into(), tagged).unwrap());
        assert_eq!(pipeline.len(), 4);
    }

    #[test]
    fn absent_record_omits_namespace() {
        let reg = registry(&["user"]);
        let mut pipeline = MutationPipeline::new();
        pipeline.add(&reg, "user".into(), Arc::new(first_word)).unwrap();
        let out = pipeline.apply_all("   ");
        assert!(out.records.is_empty());
        assert!(out.failures.is_empty());
    }

    #[test]
    fn failing_transform_is_isolated() {
        let reg = registry(&["user", "broken", "panicky"]);
        let mut pipeline = MutationPipeline::new();
        pipeline
            .add(&reg, "broken".into(), Arc::new(|_: &str| -> TransformResult { Err("no parse".into()) }))
            .unwrap();
        pipeline
            .add(&reg, "panicky".into(), Arc::new(|_: &str| -> TransformResult { panic!("bad input") }))
            .unwrap();
        pipeline.add(&reg, "user".into(), Arc::new(first_word)).unwrap();

        let out = pipeline.apply_all("JOIN alice");
        assert_eq!(out.records.len(), 1);
        assert_eq!(
            out.record_for(&"user".into()).and_then(|r| r.get("event")),
            Some(&Value::from("JOIN"))
        );
        assert_eq!(out.failures.len(), 2);
        assert_eq!(out.failures[0].namespace, Namespace::new("broken"));
        assert_eq!(out.failures[0].message, "no parse");
        assert!(out.failures[1].message.contains("bad input"));
    }

    #[test]
    fn later_mutation_wins_within_namespace() {
        let reg = registry(&["user"]);
        let mut pipeline = MutationPipeline::new();
        pipeline.add(&reg, "user".into(), Arc::new(first_word)).unwrap();
        pipeline
            .add(
                &reg,
                "user".into(),
                Arc::new(|_: &str| -> TransformResult {
                    Ok(Some(Record::new().with("event", "OVERRIDE")))
                }),
            )
            .unwrap();
        let out = pipeline.apply_all("JOIN alice");
        assert_eq!(out.records.len(), 1);
        assert_eq!(
            out.records[0].1.get("event"),
            Some(&Value::from("OVERRIDE"))
        );
    }
}
