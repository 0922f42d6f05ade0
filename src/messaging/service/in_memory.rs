//! # In-Memory Messaging Service
//!
//! Thread-safe in-memory queue implementation for tests and local
//! development, mirroring the dead-letter semantics of the RabbitMQ
//! provider: `nack(requeue = false)` moves the delivery to `{queue}_dlq`,
//! `nack(requeue = true)` returns it to the head of the queue with the
//! redelivered flag set.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::messaging::envelope::MessageEnvelope;
use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::service::traits::{
    dlq_name, MessagingService, RawDelivery, ReceiptHandle,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    /// Ready messages, FIFO
    messages: VecDeque<StoredMessage>,
    /// Delivered but not yet acked/nacked, keyed by receipt id
    in_flight: HashMap<u64, StoredMessage>,
}

/// In-memory messaging service for testing.
#[derive(Debug, Default)]
pub struct InMemoryMessagingService {
    queues: RwLock<HashMap<String, InMemoryQueue>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl InMemoryMessagingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-declared queues
    pub async fn with_queues(queue_names: &[&str]) -> Self {
        let service = Self::new();
        for name in queue_names {
            // Declaration cannot fail for the in-memory provider
            let _ = service.ensure_queue(name).await;
        }
        service
    }

    fn allocate_id(&self) -> u64 {
        self.next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1
    }

    /// Number of ready messages in a queue (for tests)
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues.get(queue_name).map(|q| q.messages.len()).unwrap_or(0)
    }

    /// Number of dead-lettered messages for a primary queue (for tests)
    pub async fn dlq_length(&self, queue_name: &str) -> usize {
        self.queue_length(&dlq_name(queue_name)).await
    }

    /// Enqueue raw bytes, bypassing envelope encoding (for tests of
    /// malformed-envelope handling)
    pub async fn publish_raw(&self, queue_name: &str, body: Vec<u8>) {
        let id = self.allocate_id();
        let mut queues = self.queues.write().await;
        let queue = queues.entry(queue_name.to_string()).or_default();
        queue.messages.push_back(StoredMessage {
            id,
            body,
            redelivered: false,
        });
    }

    /// Drain and decode every ready message in a queue (for tests)
    pub async fn take_envelopes(&self, queue_name: &str) -> Vec<MessageEnvelope> {
        let mut queues = self.queues.write().await;
        let Some(queue) = queues.get_mut(queue_name) else {
            return Vec::new();
        };
        queue
            .messages
            .drain(..)
            .filter_map(|m| MessageEnvelope::decode(&m.body).ok())
            .collect()
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        let mut queues = self.queues.write().await;
        queues.entry(queue_name.to_string()).or_default();
        queues.entry(dlq_name(queue_name)).or_default();
        Ok(())
    }

    async fn publish(&self, queue_name: &str, envelope: &MessageEnvelope) -> MessagingResult<()> {
        let body = envelope.to_bytes()?;
        let id = self.allocate_id();

        let mut queues = self.queues.write().await;
        let queue = queues.entry(queue_name.to_string()).or_default();
        queue.messages.push_back(StoredMessage {
            id,
            body,
            redelivered: false,
        });
        Ok(())
    }

    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
    ) -> MessagingResult<Vec<RawDelivery>> {
        let mut queues = self.queues.write().await;
        let Some(queue) = queues.get_mut(queue_name) else {
            return Ok(Vec::new());
        };

        let mut deliveries = Vec::new();
        while deliveries.len() < max_messages {
            let Some(message) = queue.messages.pop_front() else {
                break;
            };
            deliveries.push(RawDelivery {
                receipt: ReceiptHandle::from(message.id),
                body: message.body.clone(),
                redelivered: message.redelivered,
            });
            queue.in_flight.insert(message.id, message);
        }
        Ok(deliveries)
    }

    async fn ack(&self, queue_name: &str, receipt: &ReceiptHandle) -> MessagingResult<()> {
        let id = parse_receipt(receipt)?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::ack(queue_name, "unknown queue"))?;
        queue
            .in_flight
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| MessagingError::ack(queue_name, format!("unknown delivery {id}")))
    }

    async fn nack(
        &self,
        queue_name: &str,
        receipt: &ReceiptHandle,
        requeue: bool,
    ) -> MessagingResult<()> {
        let id = parse_receipt(receipt)?;
        let mut queues = self.queues.write().await;

        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::nack(queue_name, "unknown queue"))?;
        let mut message = queue
            .in_flight
            .remove(&id)
            .ok_or_else(|| MessagingError::nack(queue_name, format!("unknown delivery {id}")))?;

        if requeue {
            message.redelivered = true;
            queue.messages.push_front(message);
        } else {
            queues
                .entry(dlq_name(queue_name))
                .or_default()
                .messages
                .push_back(message);
        }
        Ok(())
    }

    async fn health_check(&self) -> MessagingResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

fn parse_receipt(receipt: &ReceiptHandle) -> MessagingResult<u64> {
    receipt
        .as_str()
        .parse()
        .map_err(|_| MessagingError::invalid_receipt_handle(receipt.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn envelope(command: &str) -> MessageEnvelope {
        MessageEnvelope::new(command, json!({"case_id": "C1"}), Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_publish_receive_ack() {
        let service = InMemoryMessagingService::with_queues(&["q"]).await;
        service.publish("q", &envelope("a")).await.unwrap();
        service.publish("q", &envelope("b")).await.unwrap();

        let deliveries = service.receive("q", 10).await.unwrap();
        assert_eq!(deliveries.len(), 2);
        let first = MessageEnvelope::decode(&deliveries[0].body).unwrap();
        assert_eq!(first.command, "a");

        for delivery in &deliveries {
            service.ack("q", &delivery.receipt).await.unwrap();
        }
        assert_eq!(service.queue_length("q").await, 0);
        assert!(service.receive("q", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nack_requeue_returns_to_head() {
        let service = InMemoryMessagingService::with_queues(&["q"]).await;
        service.publish("q", &envelope("first")).await.unwrap();
        service.publish("q", &envelope("second")).await.unwrap();

        let deliveries = service.receive("q", 1).await.unwrap();
        service.nack("q", &deliveries[0].receipt, true).await.unwrap();

        let redelivered = service.receive("q", 1).await.unwrap();
        assert!(redelivered[0].redelivered);
        let body = MessageEnvelope::decode(&redelivered[0].body).unwrap();
        assert_eq!(body.command, "first");
    }

    #[tokio::test]
    async fn test_nack_without_requeue_dead_letters() {
        let service = InMemoryMessagingService::with_queues(&["q"]).await;
        service.publish("q", &envelope("poison")).await.unwrap();

        let deliveries = service.receive("q", 1).await.unwrap();
        service.nack("q", &deliveries[0].receipt, false).await.unwrap();

        assert_eq!(service.queue_length("q").await, 0);
        assert_eq!(service.dlq_length("q").await, 1);
    }

    #[tokio::test]
    async fn test_ack_unknown_delivery_errors() {
        let service = InMemoryMessagingService::with_queues(&["q"]).await;
        let err = service.ack("q", &ReceiptHandle::from(99u64)).await;
        assert!(err.is_err());
    }
}
