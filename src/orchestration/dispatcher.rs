//! # Dispatcher
//!
//! Turns a workflow step into a concrete outbound command and publishes it
//! with correlation metadata:
//!
//! | Step type | Queue | Command |
//! |-----------|-------|---------|
//! | upload    | file-transfer   | `upload_case` |
//! | download  | file-transfer   | `download_results` |
//! | execute   | remote-executor | `execute_command` |
//!
//! Publishing uses publisher confirms; a broker-side failure surfaces as a
//! retryable error so the caller can nack-requeue the inbound event rather
//! than lose it.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::config::{ConfigurationError, PathsConfig, QueuesConfig};
use crate::messaging::{MessageEnvelope, MessagingError, MessagingService};
use crate::state_machine::events::{commands, OutboundCommand};

use super::workflow::{StepDefinition, StepType, WorkflowDefinition};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Rendering failed: a configuration problem, terminal for the case
    #[error(transparent)]
    Render(#[from] ConfigurationError),

    /// The broker rejected or failed to confirm the publish; retryable
    #[error(transparent)]
    Broker(#[from] MessagingError),

    /// Internal invariant violation (execute step without a GPU)
    #[error("Dispatch error for step '{step}': {message}")]
    Invalid { step: String, message: String },
}

#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    messaging: Arc<dyn MessagingService>,
    workflow: Arc<WorkflowDefinition>,
    queues: QueuesConfig,
    paths: PathsConfig,
}

impl CommandDispatcher {
    pub fn new(
        messaging: Arc<dyn MessagingService>,
        workflow: Arc<WorkflowDefinition>,
        queues: QueuesConfig,
        paths: PathsConfig,
    ) -> Self {
        Self {
            messaging,
            workflow,
            queues,
            paths,
        }
    }

    /// Publish the outbound command for a dispatched step.
    pub async fn dispatch_step(
        &self,
        case_id: &str,
        correlation_id: Uuid,
        step: &StepDefinition,
        gpu_index: Option<i64>,
    ) -> Result<(), DispatchError> {
        let (queue, command_name, outbound) = self.build(case_id, step, gpu_index)?;

        let envelope = MessageEnvelope::new(command_name, outbound.to_payload(), correlation_id);
        self.messaging.publish(queue, &envelope).await?;

        tracing::info!(
            %correlation_id,
            case_id,
            step = %step.name,
            command = command_name,
            queue,
            "dispatched workflow step"
        );
        Ok(())
    }

    fn build(
        &self,
        case_id: &str,
        step: &StepDefinition,
        gpu_index: Option<i64>,
    ) -> Result<(&str, &'static str, OutboundCommand), DispatchError> {
        match step.step_type {
            StepType::Upload => Ok((
                self.queues.file_transfer.as_str(),
                commands::UPLOAD_CASE,
                OutboundCommand::Transfer {
                    case_id: case_id.to_string(),
                    local_path: join(&self.paths.local_case_root, case_id),
                    remote_path: join(&self.paths.remote_upload_root, case_id),
                },
            )),
            StepType::Download => Ok((
                self.queues.file_transfer.as_str(),
                commands::DOWNLOAD_RESULTS,
                OutboundCommand::Transfer {
                    case_id: case_id.to_string(),
                    local_path: join(&join(&self.paths.local_case_root, case_id), "results"),
                    remote_path: join(&self.paths.remote_download_root, case_id),
                },
            )),
            StepType::Execute => {
                let gpu_index = gpu_index.ok_or_else(|| DispatchError::Invalid {
                    step: step.name.clone(),
                    message: "execute step dispatched without a GPU slot".to_string(),
                })?;
                let command = self.workflow.render_command(step, case_id, gpu_index)?;
                Ok((
                    self.queues.remote_executor.as_str(),
                    commands::EXECUTE_COMMAND,
                    OutboundCommand::Execute {
                        case_id: case_id.to_string(),
                        command,
                        gpu_id: gpu_index,
                        step: step.name.clone(),
                    },
                ))
            }
        }
    }
}

/// Join path segments with a forward slash; remote paths are always POSIX.
fn join(root: &str, segment: &str) -> String {
    format!("{}/{}", root.trim_end_matches('/'), segment)
}
