//! # Message Envelope
//!
//! The JSON envelope carried on every queue:
//!
//! ```json
//! {
//!   "command": "execute_command",
//!   "payload": { "case_id": "C1" },
//!   "timestamp": "2026-08-02T12:00:00Z",
//!   "correlation_id": "6f9d…",
//!   "retry_count": 0
//! }
//! ```
//!
//! Inbound decoding is lenient where the wire contract says to be:
//! `timestamp` defaults to now, `retry_count` to 0, and a missing
//! `correlation_id` is tolerated (the consumer synthesizes one and logs).
//! `command` and `payload` are required; their absence makes the envelope
//! malformed and it is dead-lettered without retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::errors::MessagingError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub command: String,
    pub payload: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub retry_count: u32,
}

impl MessageEnvelope {
    /// Build an outbound envelope with a fresh timestamp and zero retries.
    pub fn new(command: impl Into<String>, payload: Value, correlation_id: Uuid) -> Self {
        Self {
            command: command.into(),
            payload,
            timestamp: Utc::now(),
            correlation_id: Some(correlation_id),
            retry_count: 0,
        }
    }

    /// Copy of this envelope with a bumped retry count (for redelivery)
    pub fn with_retry_count(&self, retry_count: u32) -> Self {
        Self {
            retry_count,
            ..self.clone()
        }
    }

    /// Decode an inbound envelope, enforcing the required-field contract.
    pub fn decode(body: &[u8]) -> Result<Self, MessagingError> {
        let envelope: Self = serde_json::from_slice(body)
            .map_err(|e| MessagingError::deserialization(e.to_string()))?;

        if envelope.command.is_empty() {
            return Err(MessagingError::deserialization(
                "envelope command must not be empty",
            ));
        }
        if !envelope.payload.is_object() {
            return Err(MessagingError::deserialization(
                "envelope payload must be a JSON object",
            ));
        }
        Ok(envelope)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        serde_json::to_vec(self).map_err(|e| MessagingError::serialization(e.to_string()))
    }

    /// The envelope's correlation id, synthesizing one when the producer
    /// omitted it. The boolean reports whether synthesis happened so the
    /// caller can log it.
    pub fn correlation_or_synthesized(&self) -> (Uuid, bool) {
        match self.correlation_id {
            Some(id) => (id, false),
            None => (Uuid::new_v4(), true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let correlation = Uuid::new_v4();
        let envelope =
            MessageEnvelope::new("new_case_found", json!({"case_id": "C1"}), correlation);
        let decoded = MessageEnvelope::decode(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.retry_count, 0);
    }

    #[test]
    fn test_lenient_defaults() {
        let body = br#"{"command": "new_case_found", "payload": {"case_id": "C1"}}"#;
        let envelope = MessageEnvelope::decode(body).unwrap();
        assert_eq!(envelope.retry_count, 0);
        assert_eq!(envelope.correlation_id, None);

        let (id, synthesized) = envelope.correlation_or_synthesized();
        assert!(synthesized);
        assert!(!id.is_nil());
    }

    #[test]
    fn test_missing_command_is_malformed() {
        let body = br#"{"payload": {"case_id": "C1"}}"#;
        assert!(MessageEnvelope::decode(body).is_err());

        let body = br#"{"command": "", "payload": {}}"#;
        assert!(MessageEnvelope::decode(body).is_err());
    }

    #[test]
    fn test_missing_payload_is_malformed() {
        let body = br#"{"command": "new_case_found"}"#;
        assert!(MessageEnvelope::decode(body).is_err());

        let body = br#"{"command": "new_case_found", "payload": 7}"#;
        assert!(MessageEnvelope::decode(body).is_err());
    }

    #[test]
    fn test_undecodable_body_is_malformed() {
        assert!(MessageEnvelope::decode(b"{not json").is_err());
    }

    #[test]
    fn test_with_retry_count() {
        let envelope = MessageEnvelope::new("x", json!({}), Uuid::new_v4());
        let bumped = envelope.with_retry_count(3);
        assert_eq!(bumped.retry_count, 3);
        assert_eq!(bumped.command, envelope.command);
        assert_eq!(bumped.correlation_id, envelope.correlation_id);
    }
}
