//! The matching engine.
//!
//! `Engine` owns the namespace registry, the mutation pipeline, the trigger
//! registry and the per-namespace state store. Registration takes `&mut self`
//! and therefore cannot overlap with processing; `process` takes `&self` and
//! holds the state lock for the whole call, so at most one line is matched at a
//! time even when the engine is shared across threads.

mod matcher;

/// Worker thread, line sources and hooks around the engine.
pub mod runtime;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::error::{
    panic_message, BoxError, CallbackError, ConfigurationError, EngineResult, TransformError,
};
use crate::mutation::{stateless_key, MutationPipeline, TransformFn};
use crate::namespace::{Namespace, NamespaceRegistry};
use crate::record::{IntoRecord, Record};
use crate::state::{NamespaceState, StateStore};
use crate::trigger::{CallbackFn, Requirements, TriggerId, TriggerRegistry, TriggerSpec};
use crate::value::Value;

use matcher::{CallTracker, Step};

/// What happened during one `process` call.
///
/// Callers that only care about callback side effects can ignore it; it is the
/// channel through which transform and callback failures are surfaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub processed_at: DateTime<Utc>,
    /// Number of namespace records the mutations produced.
    pub records: usize,
    /// Triggers fired, in firing order.
    pub fired: Vec<TriggerId>,
    pub transform_failures: Vec<TransformError>,
    pub callback_failures: Vec<CallbackError>,
}

impl ProcessReport {
    fn new(records: usize, transform_failures: Vec<TransformError>) -> Self {
        Self {
            processed_at: Utc::now(),
            records,
            fired: Vec::new(),
            transform_failures,
            callback_failures: Vec::new(),
        }
    }

    /// True when no transform or callback failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.transform_failures.is_empty() && self.callback_failures.is_empty()
    }

    #[must_use]
    pub fn has_fired(&self, id: TriggerId) -> bool {
        self.fired.contains(&id)
    }
}

/// Attribute-requirement matching engine.
pub struct Engine {
    config: EngineConfig,
    namespaces: NamespaceRegistry,
    mutations: MutationPipeline,
    triggers: TriggerRegistry,
    // Field names declared by typed mutations, per namespace.
    declared_fields: HashMap<Namespace, BTreeSet<&'static str>>,
    // Namespaces with at least one untyped mutation; no field checks there.
    untyped: HashSet<Namespace>,
    state: Mutex<StateStore>,
}

impl Engine {
    /// Engine with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::build(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        Self {
            config,
            namespaces: NamespaceRegistry::new(),
            mutations: MutationPipeline::new(),
            triggers: TriggerRegistry::new(),
            declared_fields: HashMap::new(),
            untyped: HashSet::new(),
            state: Mutex::new(StateStore::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    #[must_use]
    pub const fn mutations(&self) -> &MutationPipeline {
        &self.mutations
    }

    #[must_use]
    pub const fn triggers(&self) -> &TriggerRegistry {
        &self.triggers
    }

    /// Register a namespace. Returns `false` if it was already registered.
    pub fn register_namespace(&mut self, namespace: impl Into<Namespace>) -> bool {
        self.namespaces.register(namespace.into())
    }

    #[must_use]
    pub fn is_registered(&self, namespace: &Namespace) -> bool {
        self.namespaces.is_registered(namespace)
    }

    /// Register a transform producing records for `namespace`.
    ///
    /// Adding the same function item (or non-capturing closure) twice for one
    /// namespace is a no-op and returns `Ok(false)`.
    pub fn add_mutation<F>(
        &mut self,
        namespace: impl Into<Namespace>,
        transform: F,
    ) -> Result<bool, ConfigurationError>
    where
        F: Fn(&str) -> Result<Option<Record>, BoxError> + Send + Sync + 'static,
    {
        let namespace = namespace.into();
        let added = self.mutations.add_fn(&self.namespaces, namespace.clone(), transform)?;
        self.untyped.insert(namespace);
        Ok(added)
    }

    /// Register an already shared transform. Registering the same `Arc` for
    /// the same namespace again is a no-op and returns `Ok(false)`.
    pub fn add_shared_mutation(
        &mut self,
        namespace: impl Into<Namespace>,
        transform: Arc<TransformFn>,
    ) -> Result<bool, ConfigurationError> {
        let namespace = namespace.into();
        let added = self.mutations.add(&self.namespaces, namespace.clone(), transform)?;
        self.untyped.insert(namespace);
        Ok(added)
    }

    /// Register a transform producing `T` records for `namespace`.
    ///
    /// `T::FIELDS` becomes the namespace's declared field set. As long as every
    /// mutation of the namespace is typed, triggers requiring an undeclared
    /// field are rejected at registration.
    pub fn add_typed_mutation<T, F>(
        &mut self,
        namespace: impl Into<Namespace>,
        transform: F,
    ) -> Result<bool, ConfigurationError>
    where
        T: IntoRecord + 'static,
        F: Fn(&str) -> Result<Option<T>, BoxError> + Send + Sync + 'static,
    {
        let namespace = namespace.into();
        let key = stateless_key::<F>();
        let erased = move |line: &str| -> Result<Option<Record>, BoxError> {
            Ok(transform(line)?.map(IntoRecord::into_record))
        };
        let added = self
            .mutations
            .insert(&self.namespaces, namespace.clone(), Arc::new(erased), key)?;
        self.declared_fields
            .entry(namespace)
            .or_default()
            .extend(T::FIELDS.iter().copied());
        Ok(added)
    }

    /// Declared fields of `namespace`, when only typed mutations feed it.
    #[must_use]
    pub fn declared_fields(&self, namespace: &Namespace) -> Option<&BTreeSet<&'static str>> {
        if self.untyped.contains(namespace) {
            return None;
        }
        self.declared_fields.get(namespace)
    }

    /// Register a trigger firing `callback` once per line whose `namespace`
    /// record carries every required field with the expected value.
    pub fn add_trigger<I, K, V, F>(
        &mut self,
        namespace: impl Into<Namespace>,
        required: I,
        callback: F,
    ) -> Result<TriggerId, ConfigurationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
        F: Fn(&Record, &mut NamespaceState) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let requirements: Requirements = required
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.add_shared_trigger(namespace, requirements, Arc::new(callback))
    }

    pub fn add_shared_trigger(
        &mut self,
        namespace: impl Into<Namespace>,
        requirements: Requirements,
        callback: Arc<CallbackFn>,
    ) -> Result<TriggerId, ConfigurationError> {
        let namespace = namespace.into();
        if let Some(fields) = self.declared_fields(&namespace) {
            if let Some(field) = requirements.keys().find(|f| !fields.contains(f.as_str())) {
                return Err(ConfigurationError::InvalidRequirement {
                    field: field.clone(),
                    reason: format!("'{namespace}' records never carry this field"),
                });
            }
        }
        self.triggers.add(
            &self.namespaces,
            &self.config.reserved_field_prefix,
            namespace,
            requirements,
            callback,
        )
    }

    /// Match one raw line and dispatch every satisfied trigger exactly once.
    ///
    /// Transform and callback failures do not abort the call; they are logged
    /// and returned in the report. With `catch_callback_panics` off, a
    /// panicking callback unwinds out of this call; the next call still works
    /// on whatever state the callback left behind.
    pub fn process(&self, line: &str) -> EngineResult<ProcessReport> {
        let mut state = self.lock_state();

        let output = self.mutations.apply_all(line);
        for failure in &output.failures {
            warn!(namespace = %failure.namespace, error = %failure.message, "mutation transform failed");
        }

        let mut report = ProcessReport::new(output.records.len(), output.failures);
        let mut tracker = CallTracker::new();
        let prefix = self.config.reserved_field_prefix.as_str();

        for (namespace, record) in &output.records {
            trace!(namespace = %namespace, fields = record.len(), "matching record");

            for &id in self.triggers.unconditional_for(namespace) {
                if !tracker.fire_unconditional(id) {
                    continue;
                }
                if let Some(spec) = self.triggers.get(id) {
                    self.dispatch(spec, record, &mut state, &mut report);
                }
            }

            for (field, observed) in record.public_fields(prefix) {
                for &id in self.triggers.candidates_for(field) {
                    let Some(spec) = self.triggers.get(id) else {
                        continue;
                    };
                    // Requirements only ever match the trigger's own namespace.
                    if spec.namespace() != namespace {
                        continue;
                    }
                    if tracker.observe(spec, field, observed) == Step::Satisfied {
                        self.dispatch(spec, record, &mut state, &mut report);
                    }
                }
            }
        }

        Ok(report)
    }

    fn dispatch(
        &self,
        spec: &TriggerSpec,
        record: &Record,
        state: &mut StateStore,
        report: &mut ProcessReport,
    ) {
        let namespace_state = state.get(spec.namespace());
        let callback = spec.callback();
        let outcome = if self.config.catch_callback_panics {
            catch_unwind(AssertUnwindSafe(|| callback(record, namespace_state)))
                .unwrap_or_else(|payload| Err(panic_message(payload.as_ref()).into()))
        } else {
            callback(record, namespace_state)
        };

        debug!(trigger_id = %spec.id(), namespace = %spec.namespace(), "trigger fired");
        report.fired.push(spec.id());

        if let Err(e) = outcome {
            warn!(trigger_id = %spec.id(), namespace = %spec.namespace(), error = %e, "trigger callback failed");
            report.callback_failures.push(CallbackError {
                trigger_id: spec.id(),
                namespace: spec.namespace().clone(),
                message: e.to_string(),
            });
        }
    }

    /// Run `f` against a namespace's state outside of any callback.
    pub fn with_state<R>(
        &self,
        namespace: &Namespace,
        f: impl FnOnce(&mut NamespaceState) -> R,
    ) -> EngineResult<R> {
        let mut state = self.lock_state();
        Ok(f(state.get(namespace)))
    }

    /// Copy of a namespace's state, if it has been created.
    pub fn state_snapshot(&self, namespace: &Namespace) -> EngineResult<Option<NamespaceState>> {
        let state = self.lock_state();
        Ok(state.peek(namespace).cloned())
    }

    fn lock_state(&self) -> MutexGuard<'_, StateStore> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("state store lock poisoned by a panicking callback, recovering");
            self.state.clear_poison();
            poisoned.into_inner()
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("namespaces", &self.namespaces.len())
            .field("mutations", &self.mutations.len())
            .field("triggers", &self.triggers.len())
            .field("typed_namespaces", &self.declared_fields.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn irc_user(line: &str) -> Result<Option<Record>, BoxError> {
        let mut parts = line.split_whitespace();
        let (Some(event), Some(nick)) = (parts.next(), parts.next()) else {
            return Ok(None);
        };
        let mut record = Record::new().with("event", event).with("nick", nick);
        if let Some(channel) = parts.next() {
            record.insert("channel", channel);
        }
        record.insert("_raw", line);
        Ok(Some(record))
    }

    fn user_engine() -> Engine {
        let mut engine = Engine::new();
        engine.register_namespace("user");
        engine.add_mutation("user", irc_user).unwrap();
        engine
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Record, &mut NamespaceState) -> Result<(), BoxError>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (hits, move |_: &Record, _: &mut NamespaceState| -> Result<(), BoxError> {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn join_trigger_fires_only_on_join() {
        let mut engine = user_engine();
        let (hits, cb) = counter();
        let id = engine.add_trigger("user", [("event", "JOIN")], cb).unwrap();

        let report = engine.process("JOIN alice #general").unwrap();
        assert_eq!(report.fired, vec![id]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let report = engine.process("PART bob #general").unwrap();
        assert!(report.fired.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_receives_record_and_state() {
        let mut engine = user_engine();
        engine
            .add_trigger("user", [("event", "JOIN")], |record, state| {
                let nick = record.get("nick").and_then(Value::as_string).unwrap_or("?");
                state.set("last_join", nick);
                Ok(())
            })
            .unwrap();
        engine.process("JOIN alice #general").unwrap();
        let snapshot = engine.state_snapshot(&"user".into()).unwrap().unwrap();
        assert_eq!(snapshot.get("last_join"), Some(&Value::from("alice")));
    }

    #[test]
    fn all_required_values_must_match() {
        let mut engine = user_engine();
        let (hits, cb) = counter();
        engine
            .add_trigger("user", [("event", "JOIN"), ("nick", "alice")], cb)
            .unwrap();
        engine.process("JOIN bob #general").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        engine.process("PART alice #general").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        engine.process("JOIN alice #general").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn internal_fields_are_never_matched() {
        let mut engine = user_engine();
        assert!(engine
            .add_trigger("user", [("_raw", "JOIN alice")], |_, _| Ok(()))
            .is_err());
    }

    #[test]
    fn identical_registration_replaces_callback() {
        let mut engine = user_engine();
        let (first_hits, first) = counter();
        let (second_hits, second) = counter();
        let a = engine.add_trigger("user", [("event", "JOIN")], first).unwrap();
        let b = engine.add_trigger("user", [("event", "JOIN")], second).unwrap();
        assert_eq!(a, b);
        assert_eq!(engine.triggers().len(), 1);

        let report = engine.process("JOIN alice").unwrap();
        assert_eq!(report.fired.len(), 1);
        assert_eq!(first_hits.load(Ordering::SeqCst), 0);
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ties_fire_in_registration_order() {
        let mut engine = user_engine();
        let a = engine.add_trigger("user", [("event", "JOIN")], |_, _| Ok(())).unwrap();
        let b = engine.add_trigger("user", [("nick", "alice")], |_, _| Ok(())).unwrap();
        let c = engine
            .add_trigger("user", [("event", "JOIN"), ("channel", "#general")], |_, _| Ok(()))
            .unwrap();
        let report = engine.process("JOIN alice #general").unwrap();
        // `event` resolves a; `nick` resolves b; `channel` completes c.
        assert_eq!(report.fired, vec![a, b, c]);
    }

    #[test]
    fn panicking_callback_is_reported() {
        let mut engine = user_engine();
        let bad = engine
            .add_trigger("user", [("event", "JOIN")], |_, _| panic!("callback blew up"))
            .unwrap();
        let (hits, cb) = counter();
        engine.add_trigger("user", [("nick", "alice")], cb).unwrap();

        let report = engine.process("JOIN alice").unwrap();
        assert_eq!(report.fired.len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(report.callback_failures.len(), 1);
        assert_eq!(report.callback_failures[0].trigger_id, bad);
        assert!(report.callback_failures[0].message.contains("callback blew up"));

        // The engine remains usable.
        assert!(engine.process("JOIN alice").is_ok());
    }

    #[test]
    fn uncaught_panic_leaves_engine_usable() {
        let cfg = EngineConfig {
            catch_callback_panics: false,
            ..EngineConfig::default()
        };
        let mut engine = Engine::with_config(cfg).unwrap();
        engine.register_namespace("user");
        engine.add_mutation("user", irc_user).unwrap();
        engine
            .add_trigger("user", [("event", "BOOM")], |_, state| {
                state.increment("booms", 1);
                panic!("callback blew up")
            })
            .unwrap();
        let (hits, cb) = counter();
        engine.add_trigger("user", [("event", "JOIN")], cb).unwrap();

        let unwound = catch_unwind(AssertUnwindSafe(|| engine.process("BOOM alice")));
        assert!(unwound.is_err());

        let report = engine.process("JOIN alice").unwrap();
        assert_eq!(report.fired.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let snapshot = engine.state_snapshot(&"user".into()).unwrap().unwrap();
        assert_eq!(snapshot.get("booms"), Some(&Value::Int(1)));
    }

    #[test]
    fn same_mutation_function_registers_once() {
        let mut engine = user_engine();
        assert!(!engine.add_mutation("user", irc_user).unwrap());
        assert_eq!(engine.mutations().len(), 1);
    }

    #[test]
    fn with_config_validates() {
        let cfg = EngineConfig {
            reserved_field_prefix: "\t".to_string(),
            ..EngineConfig::default()
        };
        assert!(Engine::with_config(cfg).is_err());
    }
}
