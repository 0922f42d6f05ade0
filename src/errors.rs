//! Error types for the Conductor.
//!
//! The behavioral error kinds of the system (configuration, transient broker,
//! transient store, poison) are modeled as a single central enum; expected
//! control-flow outcomes (stale events, unknown commands, worker-reported
//! failures) are not errors at all; handlers resolve them into an
//! [`AckDecision`](crate::orchestration::AckDecision) instead of raising.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::orchestration::state_store::StoreError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConductorError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Transient broker error: {0}")]
    TransientBroker(String),
    #[error("Transient store error: {0}")]
    TransientStore(String),
    #[error("Store error: {0}")]
    Store(String),
    #[error("State conflict: {0}")]
    Conflict(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConductorError {
    /// Whether redelivering the triggering envelope could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientBroker(_) | Self::TransientStore(_))
    }
}

impl From<MessagingError> for ConductorError {
    fn from(error: MessagingError) -> Self {
        ConductorError::TransientBroker(error.to_string())
    }
}

impl From<StoreError> for ConductorError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Busy { .. } => ConductorError::TransientStore(error.to_string()),
            StoreError::Conflict { .. } => ConductorError::Conflict(error.to_string()),
            other => ConductorError::Store(other.to_string()),
        }
    }
}

impl From<ConfigurationError> for ConductorError {
    fn from(error: ConfigurationError) -> Self {
        ConductorError::Configuration(error.to_string())
    }
}

impl From<sqlx::Error> for ConductorError {
    fn from(error: sqlx::Error) -> Self {
        ConductorError::Store(error.to_string())
    }
}

impl From<serde_json::Error> for ConductorError {
    fn from(error: serde_json::Error) -> Self {
        ConductorError::Internal(format!("JSON serialization error: {error}"))
    }
}

pub type ConductorResult<T> = anyhow::Result<T, ConductorError>;
