//! Error types for ircevents.
//!
//! All errors are strongly typed using thiserror. Registration problems are
//! reported synchronously as `ConfigurationError`; failures raised while a line
//! is processed (`TransformError`, `CallbackError`) are isolated and collected
//! in the `ProcessReport` instead of aborting the call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::namespace::Namespace;
use crate::trigger::TriggerId;

/// Boxed error type accepted from caller-supplied transforms and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while registering namespaces, mutations or triggers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Namespace '{namespace}' is not registered")]
    UnknownNamespace {
        namespace: Namespace,
    },

    #[error("Invalid requirement field '{field}': {reason}")]
    InvalidRequirement {
        field: String,
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// A mutation transform failed while processing a line.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Transform for namespace '{namespace}' failed: {message}")]
pub struct TransformError {
    pub namespace: Namespace,
    pub message: String,
}

/// A trigger callback failed (returned an error or panicked).
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Callback for trigger {trigger_id} in namespace '{namespace}' failed: {message}")]
pub struct CallbackError {
    pub trigger_id: TriggerId,
    pub namespace: Namespace,
    pub message: String,
}

/// Errors from the runtime layer that feeds lines into the engine.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Queue '{path}' is full (capacity {capacity})")]
    QueueFull {
        path: String,
        capacity: usize,
    },

    #[error("Channel '{path}' is disconnected")]
    Disconnected {
        path: String,
    },

    #[error("Line source failed: {message}")]
    Source {
        message: String,
    },
}

/// Top-level error type for ircevents.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Callback error: {0}")]
    Callback(#[from] CallbackError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl EngineError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// The engine never retries on its own; this is a hint for the run loop.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Execution(e) => matches!(e, ExecutionError::QueueFull { .. }),
            Self::Configuration(_)
            | Self::Transform(_)
            | Self::Callback(_)
            | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for ircevents operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Render a panic payload caught by `catch_unwind` as a message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_namespace_message() {
        let err = ConfigurationError::UnknownNamespace {
            namespace: Namespace::new("user"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("user"));
        assert!(msg.contains("not registered"));
    }

    #[test]
    fn test_transform_error_message() {
        let err = TransformError {
            namespace: Namespace::new("user"),
            message: "bad line".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("user"));
        assert!(msg.contains("bad line"));
    }

    #[test]
    fn test_engine_error_from_configuration() {
        let err: EngineError = ConfigurationError::InvalidConfig {
            reason: "zero".to_string(),
        }
        .into();
        assert!(err.is_configuration());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_engine_error_retryable() {
        let full: EngineError = ExecutionError::QueueFull {
            path: "lines".to_string(),
            capacity: 4,
        }
        .into();
        assert!(full.is_execution());
        assert!(full.is_retryable());

        let gone: EngineError = ExecutionError::Disconnected {
            path: "lines".to_string(),
        }
        .into();
        assert!(!gone.is_retryable());
    }

    #[test]
    fn test_engine_error_internal() {
        let err = EngineError::internal("poisoned lock");
        assert!(err.is_internal());
        assert!(format!("{err}").contains("poisoned lock"));
    }

    #[test]
    fn test_panic_message_variants() {
        let a: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(a.as_ref()), "panicked: boom");
        let b: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(b.as_ref()), "panicked: bang");
        let c: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(c.as_ref()), "panicked");
    }
}
