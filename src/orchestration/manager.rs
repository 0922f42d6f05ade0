//! # Workflow Manager
//!
//! The per-case state machine. Every inbound event runs as: load case →
//! decide → mutate → publish → commit, and resolves to an [`AckDecision`]
//! for the consumer. Expected anomalies (stale duplicates, unknown cases,
//! state drift) are acked and dropped; terminal transitions are monotonic,
//! so checking status before acting makes every handler idempotent.
//!
//! ## GPU lifetime
//!
//! Only execute steps need a GPU. The slot is reserved on entry to the
//! first execute step, held across consecutive execute steps to avoid
//! reshuffling, and released on the first non-execute step or terminal
//! transition. Each release wakes the oldest parked case.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::ConfigurationError;
use crate::errors::{ConductorError, ConductorResult};
use crate::messaging::MessagingError;
use crate::models::CaseRecord;
use crate::state_machine::events::{CaseRef, InboundEvent, WorkerFailure};
use crate::state_machine::CaseStatus;

use super::allocator::ResourceAllocator;
use super::dispatcher::{CommandDispatcher, DispatchError};
use super::state_store::{AdmitOutcome, StateStore, StoreError};
use super::workflow::{StepDefinition, StepType, WorkflowDefinition};
use super::AckDecision;

/// Error kind recorded when configuration, not a worker, kills a case
const ERROR_KIND_CONFIGURATION: &str = "ConfigurationError";

#[derive(Debug, Clone)]
pub struct WorkflowManager {
    store: StateStore,
    workflow: Arc<WorkflowDefinition>,
    dispatcher: CommandDispatcher,
    allocator: ResourceAllocator,
}

/// Result of attempting to move a case into a step
enum StepOutcome {
    /// Step dispatched; `released` carries a slot freed on the way in
    Dispatched { released: Option<i64> },
    /// No GPU available; the case is parked
    Parked,
}

/// Failure modes of the dispatch transaction, each with its own policy
enum StepFailure {
    /// Store trouble before the publish; busy is retryable in-process
    Store(StoreError),
    /// Commit failed after the publish; never retried in-process
    Commit(StoreError),
    /// Broker refused the outbound publish; the inbound event requeues
    Broker(MessagingError),
    /// Rendering failed at runtime; terminal for the case
    Render(ConfigurationError),
    /// Invariant violation inside the Conductor
    Internal(String),
}

impl WorkflowManager {
    pub fn new(
        store: StateStore,
        workflow: Arc<WorkflowDefinition>,
        dispatcher: CommandDispatcher,
        allocator: ResourceAllocator,
    ) -> Self {
        Self {
            store,
            workflow,
            dispatcher,
            allocator,
        }
    }

    /// Route one typed event through the state machine.
    pub async fn handle_event(
        &self,
        event: InboundEvent,
        envelope_correlation: Uuid,
    ) -> ConductorResult<AckDecision> {
        tracing::debug!(
            correlation_id = %envelope_correlation,
            command = event.command_name(),
            case_id = event.case_id(),
            "handling event"
        );

        match event {
            InboundEvent::NewCaseFound(CaseRef { case_id }) => self.start_workflow(&case_id).await,
            InboundEvent::ExecutionSucceeded(payload) => {
                if let Some(stdout) = &payload.stdout {
                    tracing::debug!(case_id = %payload.case_id, stdout, "execution output");
                }
                self.advance_workflow(&payload.case_id, StepType::Execute).await
            }
            InboundEvent::CaseUploadCompleted(payload) => {
                self.advance_workflow(&payload.case_id, StepType::Upload).await
            }
            InboundEvent::ResultsDownloadCompleted(payload) => {
                self.advance_workflow(&payload.case_id, StepType::Download).await
            }
            InboundEvent::ExecutionFailed(failure)
            | InboundEvent::FileTransferFailed(failure) => self.fail_workflow(&failure).await,
            InboundEvent::RetryParked(CaseRef { case_id }) => self.retry_parked(&case_id).await,
        }
    }

    /// `new_case_found`: admit (idempotent) and dispatch the first step.
    async fn start_workflow(&self, case_id: &str) -> ConductorResult<AckDecision> {
        let outcome = match self.store.admit_case(case_id).await {
            Ok(outcome) => outcome,
            Err(e) => return self.store_failure("admit_case", case_id, e),
        };

        let case = match outcome {
            AdmitOutcome::Admitted(case) => {
                tracing::info!(
                    correlation_id = %case.correlation_id,
                    case_id,
                    "admitted new case"
                );
                case
            }
            AdmitOutcome::AlreadyPresent(case) if case.status == CaseStatus::New => {
                // A previous run admitted the case but crashed before the
                // first dispatch; this redelivery finishes the job
                tracing::info!(
                    correlation_id = %case.correlation_id,
                    case_id,
                    "resuming admitted case with no dispatched step"
                );
                case
            }
            AdmitOutcome::AlreadyPresent(case) => {
                tracing::info!(
                    correlation_id = %case.correlation_id,
                    case_id,
                    status = %case.status,
                    "duplicate discovery for known case, dropping"
                );
                return Ok(AckDecision::Ack);
            }
        };

        let Some(first) = self.workflow.first_step() else {
            return self
                .fail_case(&case.case_id, ERROR_KIND_CONFIGURATION, "workflow has no steps")
                .await;
        };
        self.enter_step(&case, first).await
    }

    /// Any success event: move the case to the step after its current one,
    /// or complete the workflow. `completed_type` is the step type the event
    /// can conclude; a mismatch with the in-flight step means a stale or
    /// out-of-order delivery.
    async fn advance_workflow(
        &self,
        case_id: &str,
        completed_type: StepType,
    ) -> ConductorResult<AckDecision> {
        let case = match self.load_for_event(case_id).await? {
            Some(case) => case,
            None => return Ok(AckDecision::Ack),
        };

        if case.status != CaseStatus::Processing {
            // Success events only make sense for an in-flight step. A parked
            // or NEW case receiving one means duplication or a buggy worker.
            tracing::info!(
                correlation_id = %case.correlation_id,
                case_id,
                status = %case.status,
                "success event does not match case state, dropping"
            );
            return Ok(AckDecision::Ack);
        }

        let Some(current) = case.current_step.clone() else {
            return Err(ConductorError::Internal(format!(
                "processing case {case_id} has no current step"
            )));
        };

        let Some(current_step) = self.workflow.step_by_name(&current) else {
            return self
                .fail_case(
                    case_id,
                    ERROR_KIND_CONFIGURATION,
                    &format!("case references unknown workflow step '{current}'"),
                )
                .await;
        };

        if current_step.step_type != completed_type {
            tracing::info!(
                correlation_id = %case.correlation_id,
                case_id,
                current_step = %current,
                expected = ?current_step.step_type,
                reported = ?completed_type,
                "success event does not match the in-flight step, dropping"
            );
            return Ok(AckDecision::Ack);
        }

        match self.workflow.next_step(&current) {
            None => self.complete_case(&case).await,
            Some(next) => self.enter_step(&case, next).await,
        }
    }

    /// Any failure event: the case terminates with the carried error.
    /// Workers own their retries; a reported failure is final here.
    async fn fail_workflow(&self, failure: &WorkerFailure) -> ConductorResult<AckDecision> {
        let case = match self.load_for_event(&failure.case_id).await? {
            Some(case) => case,
            None => return Ok(AckDecision::Ack),
        };

        tracing::warn!(
            correlation_id = %case.correlation_id,
            case_id = %failure.case_id,
            error_type = %failure.error_type,
            error_message = %failure.error_message,
            "worker reported failure"
        );
        self.fail_case(&failure.case_id, &failure.error_type, &failure.error_message)
            .await
    }

    /// Internal wake after a GPU release: re-examine one parked case.
    async fn retry_parked(&self, case_id: &str) -> ConductorResult<AckDecision> {
        let case = match self.load_for_event(case_id).await? {
            Some(case) => case,
            None => return Ok(AckDecision::Ack),
        };

        if case.status != CaseStatus::PendingResource {
            // The parked list is a hint, not ground truth
            tracing::info!(
                correlation_id = %case.correlation_id,
                case_id,
                status = %case.status,
                "wake for a case that is no longer parked, dropping"
            );
            return Ok(AckDecision::Ack);
        }

        let Some(intended) = case.current_step.clone() else {
            tracing::warn!(case_id, "parked case has no intended step, dropping wake");
            return Ok(AckDecision::Ack);
        };

        let Some(step) = self.workflow.step_by_name(&intended) else {
            return self
                .fail_case(
                    case_id,
                    ERROR_KIND_CONFIGURATION,
                    &format!("parked case references unknown workflow step '{intended}'"),
                )
                .await;
        };

        self.enter_step(&case, step).await
    }

    /// Load a case for an event, acking unknown cases and stale terminal
    /// duplicates.
    async fn load_for_event(&self, case_id: &str) -> ConductorResult<Option<CaseRecord>> {
        let case = match self.store.load_case(case_id).await {
            Ok(case) => case,
            Err(StoreError::Busy { message }) => {
                tracing::warn!(case_id, %message, "store busy loading case, requeueing");
                return Err(ConductorError::TransientStore(message));
            }
            Err(e) => return Err(e.into()),
        };

        match case {
            None => {
                tracing::info!(case_id, "event for unknown case, dropping");
                Ok(None)
            }
            Some(case) if case.status.is_terminal() => {
                tracing::info!(
                    correlation_id = %case.correlation_id,
                    case_id,
                    status = %case.status,
                    "stale event for terminal case, dropping"
                );
                Ok(None)
            }
            Some(case) => Ok(Some(case)),
        }
    }

    /// Move a case into `step`: resolve the GPU need, write the case row,
    /// publish the outbound command, commit, then wake if a slot was freed.
    async fn enter_step(
        &self,
        case: &CaseRecord,
        step: &StepDefinition,
    ) -> ConductorResult<AckDecision> {
        let attempts = self.store.busy_retry_attempts();
        let mut attempt = 0u32;

        loop {
            match self.try_enter_step(case, step).await {
                Ok(StepOutcome::Parked) => {
                    tracing::info!(
                        correlation_id = %case.correlation_id,
                        case_id = %case.case_id,
                        intended_step = %step.name,
                        "no GPU free, case parked"
                    );
                    return Ok(AckDecision::Ack);
                }
                Ok(StepOutcome::Dispatched { released }) => {
                    if released.is_some() {
                        self.allocator.wake_next_parked().await;
                    }
                    return Ok(AckDecision::Ack);
                }
                Err(StepFailure::Store(StoreError::Busy { message })) => {
                    if attempt + 1 < attempts {
                        attempt += 1;
                        let delay = self.store.busy_backoff(attempt);
                        tracing::warn!(
                            case_id = %case.case_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            %message,
                            "store busy during dispatch, retrying in-process"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    tracing::warn!(
                        case_id = %case.case_id,
                        %message,
                        "store busy after retries, requeueing event"
                    );
                    return Ok(AckDecision::Requeue);
                }
                Err(StepFailure::Store(StoreError::Conflict { message, .. })) => {
                    tracing::info!(case_id = %case.case_id, %message, "stale dispatch, dropping");
                    return Ok(AckDecision::Ack);
                }
                Err(StepFailure::Store(e)) => return Err(e.into()),
                Err(StepFailure::Commit(StoreError::Busy { message })) => {
                    // The outbound publish already happened; redelivery will
                    // re-run the (idempotent) handler rather than re-publish
                    // inside a half-open transaction
                    tracing::warn!(
                        case_id = %case.case_id,
                        %message,
                        "commit contention after publish, requeueing event"
                    );
                    return Ok(AckDecision::Requeue);
                }
                Err(StepFailure::Commit(e)) => return Err(e.into()),
                Err(StepFailure::Broker(e)) => {
                    tracing::warn!(
                        case_id = %case.case_id,
                        error = %e,
                        "outbound publish failed, requeueing event"
                    );
                    return Ok(AckDecision::Requeue);
                }
                Err(StepFailure::Render(e)) => {
                    return self
                        .fail_case(&case.case_id, ERROR_KIND_CONFIGURATION, &e.to_string())
                        .await;
                }
                Err(StepFailure::Internal(message)) => {
                    return Err(ConductorError::Internal(message));
                }
            }
        }
    }

    /// One attempt at the dispatch transaction.
    async fn try_enter_step(
        &self,
        case: &CaseRecord,
        step: &StepDefinition,
    ) -> Result<StepOutcome, StepFailure> {
        let mut tx = self.store.begin().await.map_err(StepFailure::Store)?;

        let mut released = None;
        let gpu = match (step.step_type.requires_gpu(), case.resource_index) {
            // Held across consecutive execute steps
            (true, Some(held)) => Some(held),
            (true, None) => {
                match self
                    .allocator
                    .try_reserve(&mut tx, &case.case_id)
                    .await
                    .map_err(StepFailure::Store)?
                {
                    Some(index) => Some(index),
                    None => {
                        tx.park_for_resource(case, &step.name)
                            .await
                            .map_err(StepFailure::Store)?;
                        tx.commit().await.map_err(StepFailure::Store)?;
                        return Ok(StepOutcome::Parked);
                    }
                }
            }
            (false, Some(held)) => {
                self.allocator
                    .release(&mut tx, held)
                    .await
                    .map_err(StepFailure::Store)?;
                released = Some(held);
                None
            }
            (false, None) => None,
        };

        tx.advance_to_step(case, &step.name, gpu, step.progress)
            .await
            .map_err(StepFailure::Store)?;

        // Publish before commit: a failed publish rolls everything back and
        // the inbound event is redelivered instead of lost
        self.dispatcher
            .dispatch_step(&case.case_id, case.correlation_id, step, gpu)
            .await
            .map_err(|e| match e {
                DispatchError::Render(inner) => StepFailure::Render(inner),
                DispatchError::Broker(inner) => StepFailure::Broker(inner),
                DispatchError::Invalid { .. } => StepFailure::Internal(e.to_string()),
            })?;

        tx.commit().await.map_err(StepFailure::Commit)?;
        Ok(StepOutcome::Dispatched { released })
    }

    /// Terminal success: mark completed, release any slot, wake.
    async fn complete_case(&self, case: &CaseRecord) -> ConductorResult<AckDecision> {
        match self.store.mark_completed(&case.case_id).await {
            Ok(released) => {
                tracing::info!(
                    correlation_id = %case.correlation_id,
                    case_id = %case.case_id,
                    "workflow completed"
                );
                if released.is_some() {
                    self.allocator.wake_next_parked().await;
                }
                Ok(AckDecision::Ack)
            }
            Err(e) => self.store_failure("mark_completed", &case.case_id, e),
        }
    }

    /// Terminal failure: record the error, release any slot, wake.
    async fn fail_case(
        &self,
        case_id: &str,
        error_kind: &str,
        error_message: &str,
    ) -> ConductorResult<AckDecision> {
        match self.store.mark_failed(case_id, error_kind, error_message).await {
            Ok(released) => {
                tracing::warn!(case_id, error_kind, error_message, "case failed");
                if released.is_some() {
                    self.allocator.wake_next_parked().await;
                }
                Ok(AckDecision::Ack)
            }
            Err(e) => self.store_failure("mark_failed", case_id, e),
        }
    }

    /// Shared policy for store errors outside the dispatch transaction.
    fn store_failure(
        &self,
        operation: &str,
        case_id: &str,
        error: StoreError,
    ) -> ConductorResult<AckDecision> {
        match error {
            StoreError::Busy { message } => {
                tracing::warn!(operation, case_id, %message, "store busy, requeueing event");
                Ok(AckDecision::Requeue)
            }
            StoreError::Conflict { message, .. } => {
                tracing::info!(operation, case_id, %message, "stale event, dropping");
                Ok(AckDecision::Ack)
            }
            StoreError::NotFound { .. } => {
                tracing::info!(operation, case_id, "case vanished mid-handling, dropping");
                Ok(AckDecision::Ack)
            }
            other => Err(other.into()),
        }
    }
}
