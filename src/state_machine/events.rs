//! # Event and Command Surface
//!
//! Inbound events and outbound commands exchanged over the broker. Inbound
//! dispatch is a closed tagged variant keyed on the envelope's `command`
//! field; new commands require updating [`InboundEvent::parse`], never
//! runtime reflection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire names for every command the Conductor consumes or produces.
pub mod commands {
    // Inbound
    pub const NEW_CASE_FOUND: &str = "new_case_found";
    pub const EXECUTION_SUCCEEDED: &str = "execution_succeeded";
    pub const EXECUTION_FAILED: &str = "execution_failed";
    pub const CASE_UPLOAD_COMPLETED: &str = "case_upload_completed";
    pub const RESULTS_DOWNLOAD_COMPLETED: &str = "results_download_completed";
    pub const FILE_TRANSFER_FAILED: &str = "file_transfer_failed";
    /// Internal wake event, self-published after a GPU release
    pub const RETRY_PARKED: &str = "retry_parked";

    // Outbound
    pub const UPLOAD_CASE: &str = "upload_case";
    pub const DOWNLOAD_RESULTS: &str = "download_results";
    pub const EXECUTE_COMMAND: &str = "execute_command";
}

/// Payload of `new_case_found` and `retry_parked`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRef {
    pub case_id: String,
}

/// Payload of `execution_succeeded`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSucceeded {
    pub case_id: String,
    /// Informational only; never persisted
    #[serde(default)]
    pub stdout: Option<String>,
}

/// Payload of `execution_failed` and `file_transfer_failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub case_id: String,
    pub error_type: String,
    pub error_message: String,
    #[serde(default)]
    pub original_payload: Option<Value>,
}

/// Payload of `case_upload_completed` and `results_download_completed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCompleted {
    pub case_id: String,
    pub local_path: String,
    pub remote_path: String,
}

/// Every event the Conductor's inbox understands.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    NewCaseFound(CaseRef),
    ExecutionSucceeded(ExecutionSucceeded),
    ExecutionFailed(WorkerFailure),
    CaseUploadCompleted(TransferCompleted),
    ResultsDownloadCompleted(TransferCompleted),
    FileTransferFailed(WorkerFailure),
    RetryParked(CaseRef),
}

impl InboundEvent {
    /// Parse an envelope's command and payload into a typed event.
    ///
    /// Returns `Ok(None)` for commands this Conductor does not know (benign
    /// version skew; the caller acks and drops them), and `Err` when the
    /// payload is missing required fields for a known command.
    pub fn parse(command: &str, payload: &Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match command {
            commands::NEW_CASE_FOUND => {
                Self::NewCaseFound(serde_json::from_value(payload.clone())?)
            }
            commands::EXECUTION_SUCCEEDED => {
                Self::ExecutionSucceeded(serde_json::from_value(payload.clone())?)
            }
            commands::EXECUTION_FAILED => {
                Self::ExecutionFailed(serde_json::from_value(payload.clone())?)
            }
            commands::CASE_UPLOAD_COMPLETED => {
                Self::CaseUploadCompleted(serde_json::from_value(payload.clone())?)
            }
            commands::RESULTS_DOWNLOAD_COMPLETED => {
                Self::ResultsDownloadCompleted(serde_json::from_value(payload.clone())?)
            }
            commands::FILE_TRANSFER_FAILED => {
                Self::FileTransferFailed(serde_json::from_value(payload.clone())?)
            }
            commands::RETRY_PARKED => Self::RetryParked(serde_json::from_value(payload.clone())?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// The case this event refers to
    pub fn case_id(&self) -> &str {
        match self {
            Self::NewCaseFound(p) | Self::RetryParked(p) => &p.case_id,
            Self::ExecutionSucceeded(p) => &p.case_id,
            Self::ExecutionFailed(p) | Self::FileTransferFailed(p) => &p.case_id,
            Self::CaseUploadCompleted(p) | Self::ResultsDownloadCompleted(p) => &p.case_id,
        }
    }

    /// The wire command this event was parsed from
    pub fn command_name(&self) -> &'static str {
        match self {
            Self::NewCaseFound(_) => commands::NEW_CASE_FOUND,
            Self::ExecutionSucceeded(_) => commands::EXECUTION_SUCCEEDED,
            Self::ExecutionFailed(_) => commands::EXECUTION_FAILED,
            Self::CaseUploadCompleted(_) => commands::CASE_UPLOAD_COMPLETED,
            Self::ResultsDownloadCompleted(_) => commands::RESULTS_DOWNLOAD_COMPLETED,
            Self::FileTransferFailed(_) => commands::FILE_TRANSFER_FAILED,
            Self::RetryParked(_) => commands::RETRY_PARKED,
        }
    }
}

/// Commands the Conductor publishes to worker queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundCommand {
    /// `upload_case` / `download_results` to the file-transfer worker
    Transfer {
        case_id: String,
        local_path: String,
        remote_path: String,
    },
    /// `execute_command` to the remote-executor worker
    Execute {
        case_id: String,
        command: String,
        gpu_id: i64,
        step: String,
    },
}

impl OutboundCommand {
    pub fn to_payload(&self) -> Value {
        // Serialization of these shapes cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
