//! # MessagingService Trait
//!
//! Provider-neutral queue operations the Conductor core depends on. The
//! production provider speaks AMQP via `lapin`; tests use the in-memory
//! provider. Both share dead-letter semantics: `nack(requeue = false)`
//! routes the delivery to the queue's DLQ.

use std::fmt;

use async_trait::async_trait;

use crate::messaging::envelope::MessageEnvelope;
use crate::messaging::errors::MessagingResult;

/// Opaque provider-specific handle used to ack or nack a delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for ReceiptHandle {
    fn from(tag: u64) -> Self {
        Self(tag.to_string())
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One undecoded delivery pulled from a queue.
///
/// The body stays raw so the consumer can route undecodable envelopes to the
/// DLQ instead of losing them inside the provider.
#[derive(Debug, Clone)]
pub struct RawDelivery {
    pub receipt: ReceiptHandle,
    pub body: Vec<u8>,
    /// Whether the broker has delivered this message before
    pub redelivered: bool,
}

/// Queue operations used by the Conductor core.
#[async_trait]
pub trait MessagingService: Send + Sync + fmt::Debug {
    /// Declare a durable queue together with its dead-letter pair.
    /// Idempotent.
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()>;

    /// Publish an envelope with persistence and publisher confirmation.
    async fn publish(&self, queue_name: &str, envelope: &MessageEnvelope) -> MessagingResult<()>;

    /// Pull up to `max_messages` deliveries. May return fewer, or none.
    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
    ) -> MessagingResult<Vec<RawDelivery>>;

    /// Acknowledge a delivery as terminally handled.
    async fn ack(&self, queue_name: &str, receipt: &ReceiptHandle) -> MessagingResult<()>;

    /// Negatively acknowledge a delivery. With `requeue` the message returns
    /// to the queue; without it, the broker routes it to the DLQ.
    async fn nack(
        &self,
        queue_name: &str,
        receipt: &ReceiptHandle,
        requeue: bool,
    ) -> MessagingResult<()>;

    /// Broker connectivity check for startup and liveness probes.
    async fn health_check(&self) -> MessagingResult<bool>;

    fn provider_name(&self) -> &'static str;
}

/// Dead-letter queue name for a primary queue
pub fn dlq_name(queue_name: &str) -> String {
    format!("{queue_name}_dlq")
}

/// Dead-letter exchange name for a primary queue
pub fn dlx_name(queue_name: &str) -> String {
    format!("{queue_name}_dlx")
}
