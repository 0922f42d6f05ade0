//! Inbox consumer policy tests: unknown commands, malformed envelopes,
//! poison messages, and bounded redelivery.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use common::{harness, step};
use conductor::config::StepTypeConfig;
use conductor::errors::{ConductorError, ConductorResult};
use conductor::messaging::service::InMemoryMessagingService;
use conductor::messaging::{MessageEnvelope, MessagingService};
use conductor::orchestration::{AckDecision, EnvelopeHandler, InboxConsumer};

/// Handler stub with a fixed behavior, recording what it saw
#[derive(Debug)]
struct StubHandler {
    behavior: StubBehavior,
    seen: Mutex<Vec<(MessageEnvelope, Uuid)>>,
}

#[derive(Debug, Clone, Copy)]
enum StubBehavior {
    Ack,
    Requeue,
    Fail,
}

impl StubHandler {
    fn new(behavior: StubBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            seen: Mutex::new(Vec::new()),
        })
    }

    async fn seen(&self) -> Vec<(MessageEnvelope, Uuid)> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl EnvelopeHandler for StubHandler {
    async fn handle(
        &self,
        envelope: &MessageEnvelope,
        correlation_id: Uuid,
    ) -> ConductorResult<AckDecision> {
        self.seen.lock().await.push((envelope.clone(), correlation_id));
        match self.behavior {
            StubBehavior::Ack => Ok(AckDecision::Ack),
            StubBehavior::Requeue => Ok(AckDecision::Requeue),
            StubBehavior::Fail => Err(ConductorError::Internal("handler exploded".into())),
        }
    }
}

const QUEUE: &str = "conductor_queue";

async fn consumer_with(
    handler: Arc<StubHandler>,
    max_retry: u32,
) -> (InboxConsumer, Arc<InMemoryMessagingService>) {
    let messaging = Arc::new(InMemoryMessagingService::with_queues(&[QUEUE]).await);
    let consumer = InboxConsumer::new(messaging.clone(), handler, QUEUE, max_retry, 8);
    (consumer, messaging)
}

async fn drain(consumer: &InboxConsumer) {
    while consumer.process_available().await.expect("process") > 0 {}
}

// Scenario E: a poison envelope is redelivered with an incremented retry
// count, then dead-lettered once the budget is spent.
#[tokio::test]
async fn test_poison_message_bounded_redelivery() {
    let handler = StubHandler::new(StubBehavior::Fail);
    let (consumer, messaging) = consumer_with(handler.clone(), 2).await;

    let envelope = MessageEnvelope::new("new_case_found", json!({"case_id": "C1"}), Uuid::new_v4());
    messaging.publish(QUEUE, &envelope).await.unwrap();

    drain(&consumer).await;

    // Three deliveries total: retry_count 0, 1, 2
    let seen = handler.seen().await;
    let counts: Vec<u32> = seen.iter().map(|(e, _)| e.retry_count).collect();
    assert_eq!(counts, vec![0, 1, 2]);

    assert_eq!(messaging.queue_length(QUEUE).await, 0);
    assert_eq!(messaging.dlq_length(QUEUE).await, 1);

    let dead = messaging.take_envelopes(&format!("{QUEUE}_dlq")).await;
    assert_eq!(dead[0].retry_count, 2);
    assert_eq!(dead[0].command, "new_case_found");
}

// A handler-requested requeue follows the same bounded path.
#[tokio::test]
async fn test_requeue_decision_is_bounded() {
    let handler = StubHandler::new(StubBehavior::Requeue);
    let (consumer, messaging) = consumer_with(handler.clone(), 3).await;

    let envelope = MessageEnvelope::new("execution_succeeded", json!({"case_id": "C1"}), Uuid::new_v4());
    messaging.publish(QUEUE, &envelope).await.unwrap();

    drain(&consumer).await;

    let seen = handler.seen().await;
    assert_eq!(seen.len(), 4, "initial delivery plus three redeliveries");
    assert_eq!(messaging.dlq_length(QUEUE).await, 1);
}

// An undecodable body never reaches the handler and never retries.
#[tokio::test]
async fn test_malformed_envelope_dead_letters_immediately() {
    let handler = StubHandler::new(StubBehavior::Ack);
    let (consumer, messaging) = consumer_with(handler.clone(), 5).await;

    messaging.publish_raw(QUEUE, b"{definitely not json".to_vec()).await;
    // Required field missing
    messaging
        .publish_raw(QUEUE, br#"{"payload": {"case_id": "C1"}}"#.to_vec())
        .await;

    drain(&consumer).await;

    assert!(handler.seen().await.is_empty());
    assert_eq!(messaging.queue_length(QUEUE).await, 0);
    assert_eq!(messaging.dlq_length(QUEUE).await, 2);
}

// A missing correlation id is synthesized, not rejected.
#[tokio::test]
async fn test_missing_correlation_id_is_synthesized() {
    let handler = StubHandler::new(StubBehavior::Ack);
    let (consumer, messaging) = consumer_with(handler.clone(), 5).await;

    messaging
        .publish_raw(
            QUEUE,
            br#"{"command": "new_case_found", "payload": {"case_id": "C1"}}"#.to_vec(),
        )
        .await;

    drain(&consumer).await;

    let seen = handler.seen().await;
    assert_eq!(seen.len(), 1);
    assert!(!seen[0].1.is_nil(), "a correlation id was synthesized");
    assert_eq!(messaging.dlq_length(QUEUE).await, 0);
}

// Routed through the real core: unknown commands are acked and dropped, not
// dead-lettered.
#[tokio::test]
async fn test_unknown_command_is_dropped() {
    let h = harness(
        vec![step("upload", StepTypeConfig::Upload, 100)],
        vec![],
        0,
    )
    .await;

    h.feed("system_monitor", json!({})).await;
    h.feed("totally_new_command", json!({"case_id": "C1"})).await;
    h.drain().await;

    assert_eq!(h.messaging.queue_length(&h.inbox_queue()).await, 0);
    assert_eq!(h.messaging.dlq_length(&h.inbox_queue()).await, 0);
}

// Routed through the real core: a known command with a missing required
// payload field is dead-lettered without touching case state.
#[tokio::test]
async fn test_malformed_payload_dead_letters() {
    let h = harness(
        vec![step("upload", StepTypeConfig::Upload, 100)],
        vec![],
        0,
    )
    .await;

    // execution_failed requires error_type and error_message
    h.feed("execution_failed", json!({"case_id": "C1"})).await;
    h.drain().await;

    assert_eq!(h.messaging.dlq_length(&h.inbox_queue()).await, 1);
    assert!(h
        .core
        .store()
        .load_case("C1")
        .await
        .expect("load")
        .is_none());
}
