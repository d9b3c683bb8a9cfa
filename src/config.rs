//! Engine and runtime configuration.
//!
//! Both config types deserialize from JSON with every field optional, falling
//! back to `Default`.

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::record::DEFAULT_RESERVED_PREFIX;

/// Matching engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Field names starting with this prefix are internal and never matched.
    pub reserved_field_prefix: String,
    /// Catch panics raised by trigger callbacks and report them as failures.
    pub catch_callback_panics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reserved_field_prefix: DEFAULT_RESERVED_PREFIX.to_string(),
            catch_callback_panics: true,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ConfigurationError::InvalidConfig {
            reason: format!("engine config: {e}"),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.reserved_field_prefix.chars().any(char::is_whitespace) {
            return Err(ConfigurationError::InvalidConfig {
                reason: "reserved_field_prefix cannot contain whitespace".to_string(),
            });
        }
        Ok(())
    }
}

/// Runtime (worker thread) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Max queued lines before `submit` reports backpressure.
    pub queue_capacity: usize,
    /// Name of the worker thread.
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            thread_name: "ircevents-engine".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ConfigurationError::InvalidConfig {
            reason: format!("runtime config: {e}"),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.queue_capacity == 0 {
            return Err(ConfigurationError::InvalidConfig {
                reason: "queue_capacity must be at least 1".to_string(),
            });
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigurationError::InvalidConfig {
                reason: "thread_name cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}
