//! # Event Router
//!
//! Table-driven dispatch on the envelope's `command` field. Unknown
//! commands are acked and discarded with a warning; they are almost always
//! benign version skew, not poison. Known commands with malformed payloads
//! are dead-lettered immediately.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::ConductorResult;
use crate::messaging::MessageEnvelope;
use crate::state_machine::events::InboundEvent;

use super::manager::WorkflowManager;
use super::{AckDecision, EnvelopeHandler};

#[derive(Debug, Clone)]
pub struct EventRouter {
    manager: WorkflowManager,
}

impl EventRouter {
    pub fn new(manager: WorkflowManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EnvelopeHandler for EventRouter {
    async fn handle(
        &self,
        envelope: &MessageEnvelope,
        correlation_id: Uuid,
    ) -> ConductorResult<AckDecision> {
        let event = match InboundEvent::parse(&envelope.command, &envelope.payload) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::warn!(
                    %correlation_id,
                    command = %envelope.command,
                    "unknown command, dropping"
                );
                return Ok(AckDecision::Ack);
            }
            Err(e) => {
                tracing::error!(
                    %correlation_id,
                    command = %envelope.command,
                    error = %e,
                    "malformed payload, dead-lettering"
                );
                return Ok(AckDecision::DeadLetter);
            }
        };

        self.manager.handle_event(event, correlation_id).await
    }
}
