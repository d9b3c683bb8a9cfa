//! Per-call outstanding-requirement tracking.
//!
//! A `CallTracker` lives for exactly one `Engine::process` call. Each candidate
//! trigger is seeded lazily with its full set of required field names; a field
//! is crossed off only when the observed value equals the expected one. A
//! mismatch makes the trigger unsatisfiable for the rest of the call.

use std::collections::{HashMap, HashSet};

use crate::trigger::{TriggerId, TriggerSpec};
use crate::value::Value;

/// Outcome of feeding one observed field to one candidate trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Already fired or unsatisfiable in this call.
    Skipped,
    /// Field matched; other required fields are still outstanding.
    Pending,
    /// Observed value differs from the expected one.
    Mismatch,
    /// Last outstanding field matched: the trigger must fire now.
    Satisfied,
}

#[derive(Debug, Default)]
pub(crate) struct CallTracker<'a> {
    outstanding: HashMap<TriggerId, HashSet<&'a str>>,
    fired: HashSet<TriggerId>,
    unsatisfiable: HashSet<TriggerId>,
}

impl<'a> CallTracker<'a> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn observe(&mut self, spec: &'a TriggerSpec, field: &str, observed: &Value) -> Step {
        let id = spec.id();
        if self.fired.contains(&id) || self.unsatisfiable.contains(&id) {
            return Step::Skipped;
        }

        // The reverse index only lists triggers that require `field`.
        let Some(expected) = spec.requirements().get(field) else {
            return Step::Skipped;
        };
        if expected != observed {
            self.outstanding.remove(&id);
            self.unsatisfiable.insert(id);
            return Step::Mismatch;
        }

        let remaining = self
            .outstanding
            .entry(id)
            .or_insert_with(|| spec.requirements().keys().map(String::as_str).collect());
        remaining.remove(field);
        if !remaining.is_empty() {
            return Step::Pending;
        }

        self.outstanding.remove(&id);
        self.fired.insert(id);
        Step::Satisfied
    }

    /// Mark a trigger with no requirements as fired. Returns false if it
    /// already fired in this call.
    pub(crate) fn fire_unconditional(&mut self, id: TriggerId) -> bool {
        self.fired.insert(id)
    }

    #[cfg(test)]
    pub(crate) fn outstanding_for(&self, id: TriggerId) -> Option<usize> {
        self.outstanding.get(&id).map(HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::error::BoxError;
    use crate::namespace::NamespaceRegistry;
    use crate::record::Record;
    use crate::state::NamespaceState;
    use crate::trigger::{Requirements, TriggerRegistry};

    fn spec_with(pairs: &[(&str, &str)]) -> (TriggerRegistry, TriggerId) {
        let mut namespaces = NamespaceRegistry::new();
        namespaces.register("user".into());
        let requirements: Requirements = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
            .collect();
        let mut triggers = TriggerRegistry::new();
        let id = triggers
            .add(
                &namespaces,
                "_",
                "user".into(),
                requirements,
                Arc::new(|_: &Record, _: &mut NamespaceState| -> Result<(), BoxError> { Ok(()) }),
            )
            .unwrap();
        (triggers, id)
    }

    #[test]
    fn single_field_satisfies_immediately() {
        let (triggers, id) = spec_with(&[("event", "JOIN")]);
        let spec = triggers.get(id).unwrap();
        let mut tracker = CallTracker::new();
        assert_eq!(tracker.observe(spec, "event", &"JOIN".into()), Step::Satisfied);
        assert_eq!(tracker.observe(spec, "event", &"JOIN".into()), Step::Skipped);
    }

    #[test]
    fn seeded_lazily_and_decremented() {
        let (triggers, id) = spec_with(&[("event", "JOIN"), ("nick", "alice")]);
        let spec = triggers.get(id).unwrap();
        let mut tracker = CallTracker::new();
        assert_eq!(tracker.outstanding_for(id), None);
        assert_eq!(tracker.observe(spec, "nick", &"alice".into()), Step::Pending);
        assert_eq!(tracker.outstanding_for(id), Some(1));
        assert_eq!(tracker.observe(spec, "event", &"JOIN".into()), Step::Satisfied);
        assert_eq!(tracker.outstanding_for(id), None);
    }

    #[test]
    fn duplicate_observation_does_not_complete() {
        let (triggers, id) = spec_with(&[("event", "JOIN"), ("nick", "alice")]);
        let spec = triggers.get(id).unwrap();
        let mut tracker = CallTracker::new();
        assert_eq!(tracker.observe(spec, "event", &"JOIN".into()), Step::Pending);
        assert_eq!(tracker.observe(spec, "event", &"JOIN".into()), Step::Pending);
        assert_eq!(tracker.outstanding_for(id), Some(1));
    }

    #[test]
    fn mismatch_is_sticky_for_the_call() {
        let (triggers, id) = spec_with(&[("event", "JOIN"), ("nick", "alice")]);
        let spec = triggers.get(id).unwrap();
        let mut tracker = CallTracker::new();
        assert_eq!(tracker.observe(spec, "nick", &"bob".into()), Step::Mismatch);
        assert_eq!(tracker.observe(spec, "event", &"JOIN".into()), Step::Skipped);
        assert_eq!(tracker.observe(spec, "nick", &"alice".into()), Step::Skipped);
    }

    #[test]
    fn unconditional_fires_once() {
        let (_, id) = spec_with(&[]);
        let mut tracker = CallTracker::new();
        assert!(tracker.fire_unconditional(id));
        assert!(!tracker.fire_unconditional(id));
    }
}
