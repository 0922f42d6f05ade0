//! # Inbox Consumer
//!
//! Pulls envelopes from the Conductor's inbox queue, strictly one handler
//! at a time, and turns each handler's [`AckDecision`] into broker effects:
//!
//! - `Ack`: the event is terminally handled
//! - `Requeue`: republish the envelope with `retry_count + 1` and ack the
//!   original (AMQP cannot mutate a message in place); at the retry budget
//!   the envelope is dead-lettered instead
//! - `DeadLetter`: `nack(requeue = false)`; the queue's DLX routes it
//!
//! Undecodable envelopes are dead-lettered without retry. A handler error
//! that escapes is a poison message and takes the bounded-redelivery path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::errors::ConductorResult;
use crate::messaging::{MessageEnvelope, MessagingService, RawDelivery};

use super::{AckDecision, EnvelopeHandler};

#[derive(Debug, Clone)]
pub struct InboxConsumer {
    messaging: Arc<dyn MessagingService>,
    handler: Arc<dyn EnvelopeHandler>,
    queue: String,
    max_retry_count: u32,
    prefetch: usize,
    idle_poll_interval: Duration,
}

impl InboxConsumer {
    pub fn new(
        messaging: Arc<dyn MessagingService>,
        handler: Arc<dyn EnvelopeHandler>,
        queue: impl Into<String>,
        max_retry_count: u32,
        prefetch: u16,
    ) -> Self {
        Self {
            messaging,
            handler,
            queue: queue.into(),
            max_retry_count,
            prefetch: usize::from(prefetch.max(1)),
            idle_poll_interval: Duration::from_millis(250),
        }
    }

    /// Override the idle poll interval (tests)
    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    /// Consume until the shutdown signal flips. The in-flight handler always
    /// finishes; the broker redelivers anything unacked at process exit.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> ConductorResult<()> {
        tracing::info!(queue = %self.queue, "inbox consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let handled = match self.process_available().await {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!(error = %e, "inbox poll failed, backing off");
                    0
                }
            };

            if handled == 0 {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(self.idle_poll_interval) => {}
                }
            }
        }

        tracing::info!(queue = %self.queue, "inbox consumer stopped");
        Ok(())
    }

    /// Pull up to one prefetch window and handle each delivery in order.
    /// Returns how many deliveries were processed.
    pub async fn process_available(&self) -> ConductorResult<usize> {
        let deliveries = self.messaging.receive(&self.queue, self.prefetch).await?;
        let count = deliveries.len();

        for delivery in deliveries {
            self.process_delivery(delivery).await;
        }
        Ok(count)
    }

    /// Handle a single delivery end to end. Broker effects are best-effort:
    /// a failed ack only means the broker redelivers to an idempotent
    /// handler.
    async fn process_delivery(&self, delivery: RawDelivery) {
        let envelope = match MessageEnvelope::decode(&delivery.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(
                    queue = %self.queue,
                    error = %e,
                    "malformed envelope, dead-lettering"
                );
                self.nack(&delivery, false).await;
                return;
            }
        };

        let (correlation_id, synthesized) = envelope.correlation_or_synthesized();
        if synthesized {
            tracing::info!(
                %correlation_id,
                command = %envelope.command,
                "inbound envelope had no correlation id, synthesized one"
            );
        }

        match self.handler.handle(&envelope, correlation_id).await {
            Ok(AckDecision::Ack) => self.ack(&delivery).await,
            Ok(AckDecision::DeadLetter) => self.nack(&delivery, false).await,
            Ok(AckDecision::Requeue) => {
                self.redeliver(&envelope, &delivery, "handler requested requeue")
                    .await;
            }
            Err(e) => {
                tracing::error!(
                    %correlation_id,
                    command = %envelope.command,
                    retry_count = envelope.retry_count,
                    error = %e,
                    "unexpected handler error, treating envelope as poison"
                );
                self.redeliver(&envelope, &delivery, "poison message").await;
            }
        }
    }

    /// Bounded redelivery: bump the retry count and republish, or
    /// dead-letter once the budget is spent.
    async fn redeliver(&self, envelope: &MessageEnvelope, delivery: &RawDelivery, reason: &str) {
        if envelope.retry_count >= self.max_retry_count {
            tracing::warn!(
                command = %envelope.command,
                retry_count = envelope.retry_count,
                max_retry_count = self.max_retry_count,
                reason,
                "retry budget exhausted, dead-lettering envelope"
            );
            self.nack(delivery, false).await;
            return;
        }

        let bumped = envelope.with_retry_count(envelope.retry_count + 1);
        match self.messaging.publish(&self.queue, &bumped).await {
            Ok(()) => {
                tracing::info!(
                    command = %envelope.command,
                    retry_count = bumped.retry_count,
                    reason,
                    "redelivering envelope"
                );
                self.ack(delivery).await;
            }
            Err(e) => {
                // Never lose the inbound event: fall back to a broker
                // requeue of the original delivery
                tracing::warn!(
                    command = %envelope.command,
                    error = %e,
                    "redelivery publish failed, requeueing original delivery"
                );
                self.nack(delivery, true).await;
            }
        }
    }

    async fn ack(&self, delivery: &RawDelivery) {
        if let Err(e) = self.messaging.ack(&self.queue, &delivery.receipt).await {
            tracing::warn!(receipt = %delivery.receipt, error = %e, "ack failed");
        }
    }

    async fn nack(&self, delivery: &RawDelivery, requeue: bool) {
        if let Err(e) = self
            .messaging
            .nack(&self.queue, &delivery.receipt, requeue)
            .await
        {
            tracing::warn!(receipt = %delivery.receipt, error = %e, "nack failed");
        }
    }
}
