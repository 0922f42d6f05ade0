//! # Messaging Error Types
//!
//! Structured error handling for the messaging layer using thiserror.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a queue operation error
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a queue creation error
    pub fn queue_creation(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, "create", message)
    }

    /// Create a publish error
    pub fn publish(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, "publish", message)
    }

    /// Create a receive error
    pub fn receive(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, "receive", message)
    }

    /// Create an ack error
    pub fn ack(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, "ack", message)
    }

    /// Create a nack error
    pub fn nack(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, "nack", message)
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    /// Create a deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid receipt handle error
    pub fn invalid_receipt_handle(handle: impl Into<String>) -> Self {
        Self::Internal {
            message: format!("Invalid receipt handle: {}", handle.into()),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            MessagingError::deserialization(err.to_string())
        } else {
            MessagingError::serialization(err.to_string())
        }
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
