//! Configuration for the agent.
//!
//! - [`settings`] - the settings document (sections of text or list parameters)
//! - [`agent`] - `AgentConfiguration`, the validated view the agent runs from
//! - [`source`] - `FileConfigSource`, a watched document on disk

pub mod agent;
pub mod settings;
pub mod source;

pub use agent::{AgentConfiguration, DEFAULT_CHECK_INTERVAL};
pub use settings::{ConfigurationSettings, Parameter, Section};
pub use source::{ConfigRevision, FileConfigSource};

use thiserror::Error;

use crate::counters::MalformedSpecError;

/// Errors produced while loading or interpreting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The settings document could not be read.
    #[error("Failed to read settings document: {0}")]
    Io(String),

    /// The settings document is not valid.
    #[error("Invalid settings document: {0}")]
    Parse(String),

    /// A required section is absent.
    #[error("Missing configuration section '{0}'")]
    MissingSection(String),

    /// A required parameter is absent.
    #[error("Missing parameter '{key}' in section '{section}'")]
    MissingKey {
        /// Section that was searched.
        section: String,
        /// Missing parameter name.
        key: String,
    },

    /// A parameter has an unusable value.
    #[error("Invalid value for '{section}.{key}': {reason}")]
    InvalidValue {
        /// Section of the parameter.
        section: String,
        /// Parameter name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A counter descriptor does not match the accepted grammar.
    #[error("Counter descriptor #{index} is malformed: {source}")]
    MalformedCounter {
        /// Position of the descriptor in the configured list.
        index: usize,
        /// The parse failure.
        #[source]
        source: MalformedSpecError,
    },

    /// Field validation failed.
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}
