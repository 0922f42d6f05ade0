use serde::{Deserialize, Serialize};
use std::fmt;

/// Case status definitions.
///
/// Transitions form a DAG: `NEW → PENDING_RESOURCE ↔ PROCESSING →
/// {COMPLETED | FAILED}`. Once terminal, a case never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    /// Just admitted; no step dispatched yet
    New,
    /// Parked: the next step needs a GPU and none was free
    PendingResource,
    /// A step is in flight on a worker
    Processing,
    /// All workflow steps completed successfully
    Completed,
    /// A worker reported failure, or configuration made progress impossible
    Failed,
}

impl CaseStatus {
    /// Check if this is a terminal status (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if this status holds a reserved resource
    ///
    /// Only `PROCESSING` cases may own a GPU slot; every other status
    /// implies the resource column is null.
    pub fn may_hold_resource(&self) -> bool {
        matches!(self, Self::Processing)
    }

    /// Check if a transition to `next` is allowed by the status DAG
    pub fn can_transition_to(&self, next: CaseStatus) -> bool {
        use CaseStatus::*;
        match (self, next) {
            (New, PendingResource) | (New, Processing) | (New, Failed) => true,
            (PendingResource, Processing) | (PendingResource, Failed) => true,
            // Step-to-step advance keeps the case in PROCESSING
            (Processing, Processing) => true,
            (Processing, PendingResource) => true,
            (Processing, Completed) | (Processing, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::PendingResource => write!(f, "PENDING_RESOURCE"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for CaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "PENDING_RESOURCE" => Ok(Self::PendingResource),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid case status: {s}")),
        }
    }
}

impl Default for CaseStatus {
    fn default() -> Self {
        Self::New
    }
}

/// GPU slot state. Only `state` and the owner column are written by the
/// Conductor; metric columns belong to the external curator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GpuState {
    Free,
    Reserved,
}

impl fmt::Display for GpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "FREE"),
            Self::Reserved => write!(f, "RESERVED"),
        }
    }
}

impl std::str::FromStr for GpuState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FREE" => Ok(Self::Free),
            "RESERVED" => Ok(Self::Reserved),
            _ => Err(format!("Invalid GPU state: {s}")),
        }
    }
}
