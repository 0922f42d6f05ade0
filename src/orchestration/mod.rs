//! # Orchestration
//!
//! The Conductor core: a single cooperative event loop that pulls one
//! inbound envelope at a time, runs the handler transaction to completion
//! (including the outbound publish), and only then fetches the next
//! envelope. Concurrency exists only at the edges: the broker prefetch
//! window and external store readers.
//!
//! Data flow: [`consumer::InboxConsumer`] delivers an envelope to the
//! [`router::EventRouter`], which validates it and invokes the
//! [`manager::WorkflowManager`]. The manager reads and writes the store
//! through [`state_store::StateStore`], asks [`allocator::ResourceAllocator`]
//! for GPU slots, consults the [`workflow::WorkflowDefinition`] for the next
//! step, and hands outbound commands to [`dispatcher::CommandDispatcher`].
//! Every handler returns an [`AckDecision`] that the consumer turns into a
//! broker ack, a bounded redelivery, or a dead-letter.

pub mod allocator;
pub mod consumer;
pub mod core;
pub mod dispatcher;
pub mod manager;
pub mod router;
pub mod state_store;
pub mod workflow;

use async_trait::async_trait;

use crate::errors::ConductorResult;
use crate::messaging::MessageEnvelope;

/// The terminal handling decision for one inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// The event was handled (or deliberately dropped); remove it
    Ack,
    /// Transient trouble; redeliver within the envelope's retry budget
    Requeue,
    /// Unrecoverable envelope; route to the dead-letter queue
    DeadLetter,
}

/// Seam between the inbox consumer and the event router, so consumer policy
/// (retry counting, poison handling) is testable with stub handlers.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync + std::fmt::Debug {
    async fn handle(
        &self,
        envelope: &MessageEnvelope,
        correlation_id: uuid::Uuid,
    ) -> ConductorResult<AckDecision>;
}

pub use self::consumer::InboxConsumer;
pub use self::core::ConductorCore;
pub use self::manager::WorkflowManager;
pub use self::router::EventRouter;
pub use self::state_store::StateStore;
pub use self::workflow::WorkflowDefinition;
