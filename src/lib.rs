//! # ircevents - attribute-requirement matching for protocol lines
//!
//! ircevents turns raw protocol lines into namespace-scoped structured records
//! and dispatches callbacks whose required field values are all observed while
//! one line is processed.
//!
//! ## Core Concepts
//!
//! - **Namespace**: a logical scope of records (e.g. one parsed message kind)
//! - **Mutation**: caller-supplied transform from a raw line to a record
//! - **Trigger**: namespace + required field values + callback
//! - **State**: per-namespace key/value memory handed to callbacks
//!
//! ## Usage
//!
//! ```rust
//! use ircevents::{Engine, Record};
//!
//! let mut engine = Engine::new();
//! engine.register_namespace("user");
//! engine
//!     .add_mutation("user", |line: &str| {
//!         let mut parts = line.split_whitespace();
//!         Ok(match (parts.next(), parts.next()) {
//!             (Some(event), Some(nick)) => Some(Record::new().with("event", event).with("nick", nick)),
//!             _ => None,
//!         })
//!     })
//!     .unwrap();
//! engine
//!     .add_trigger("user", [("event", "JOIN")], |record, state| {
//!         state.increment("joins", 1);
//!         assert!(record.contains("nick"));
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let report = engine.process("JOIN alice #general").unwrap();
//! assert_eq!(report.fired.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod mutation;
pub mod namespace;
pub mod record;
pub mod state;
pub mod trigger;
pub mod value;

// Re-export primary types at crate root for convenience
pub use config::{EngineConfig, RuntimeConfig};
pub use engine::runtime::{
    run_source, EngineRuntime, IterSource, LineSource, ReaderSource, RunSummary, RuntimeHooks,
};
pub use engine::{Engine, ProcessReport};
pub use error::{
    BoxError, CallbackError, ConfigurationError, EngineError, EngineResult, ExecutionError,
    TransformError,
};
pub use mutation::{MutationOutput, MutationPipeline, TransformFn};
pub use namespace::{Namespace, NamespaceRegistry};
pub use record::{IntoRecord, Record};
pub use state::{NamespaceState, StateStore};
pub use trigger::{CallbackFn, Requirements, TriggerId, TriggerRegistry, TriggerSpec};
pub use value::Value;
