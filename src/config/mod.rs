//! # Configuration
//!
//! TOML-backed configuration for the Conductor process: broker connection,
//! queue names, store location, workflow step list, and command templates.
//!
//! Values support `${ENV_VAR}` substitution in the file contents, and every
//! struct is validated at load time; a malformed workflow or a missing
//! command template is a startup failure, never a runtime surprise.

mod conductor;
mod loader;

pub use self::conductor::{
    BrokerConfig, ConductorConfig, PathsConfig, QueuesConfig, ResourcesConfig, StepTypeConfig,
    StoreConfig, WorkflowConfig, WorkflowStepConfig,
};

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to read config file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Workflow definition error: {0}")]
    Workflow(String),

    #[error("Command template error for step '{step}': {message}")]
    Template { step: String, message: String },
}

impl ConfigurationError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn workflow(message: impl Into<String>) -> Self {
        Self::Workflow(message.into())
    }

    pub fn template(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            step: step.into(),
            message: message.into(),
        }
    }
}
