//! Shared fixtures for integration tests: a Conductor core wired to an
//! in-memory broker and a temp-file SQLite store.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use conductor::config::{
    ConductorConfig, PathsConfig, ResourcesConfig, StepTypeConfig, StoreConfig, WorkflowConfig,
    WorkflowStepConfig,
};
use conductor::messaging::service::InMemoryMessagingService;
use conductor::messaging::{MessageEnvelope, MessagingService};
use conductor::models::{CaseHistoryRow, CaseRecord, GpuResource};
use conductor::orchestration::ConductorCore;

pub struct Harness {
    pub core: ConductorCore,
    pub messaging: Arc<InMemoryMessagingService>,
    _dir: tempfile::TempDir,
}

/// Shorthand for a workflow step entry
pub fn step(name: &str, step_type: StepTypeConfig, progress: u8) -> WorkflowStepConfig {
    WorkflowStepConfig::builder()
        .name(name.to_string())
        .step_type(step_type)
        .progress(progress)
        .build()
}

/// Build a Conductor over a fresh store and in-memory broker.
pub async fn harness(
    steps: Vec<WorkflowStepConfig>,
    commands: Vec<(&str, &str)>,
    gpu_count: u32,
) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");

    let config = ConductorConfig::builder()
        .store(
            StoreConfig::builder()
                .path(dir.path().join("state.db").display().to_string())
                .build(),
        )
        .paths(
            PathsConfig::builder()
                .local_case_root("/var/lib/conductor/cases".to_string())
                .remote_upload_root("/data/cases".to_string())
                .remote_download_root("/data/results".to_string())
                .build(),
        )
        .resources(ResourcesConfig::builder().gpu_count(gpu_count).build())
        .workflow(WorkflowConfig::builder().steps(steps).build())
        .commands(
            commands
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
        .build();

    let messaging = Arc::new(InMemoryMessagingService::new());
    let core = ConductorCore::bootstrap(config, messaging.clone())
        .await
        .expect("bootstrap");

    Harness {
        core,
        messaging,
        _dir: dir,
    }
}

impl Harness {
    /// Publish an inbound event onto the Conductor's inbox
    pub async fn feed(&self, command: &str, payload: Value) {
        let envelope = MessageEnvelope::new(command, payload, Uuid::new_v4());
        self.messaging
            .publish(&self.core.config().queues.inbox, &envelope)
            .await
            .expect("feed");
    }

    /// Process inbox messages (including self-published wakes) until idle
    pub async fn drain(&self) {
        loop {
            let handled = self
                .core
                .consumer()
                .process_available()
                .await
                .expect("process_available");
            if handled == 0 {
                break;
            }
        }
    }

    pub async fn case(&self, case_id: &str) -> CaseRecord {
        self.core
            .store()
            .load_case(case_id)
            .await
            .expect("load_case")
            .unwrap_or_else(|| panic!("case {case_id} not found"))
    }

    pub async fn gpu(&self, gpu_index: i64) -> GpuResource {
        let mut conn = self.core.store().pool().acquire().await.expect("acquire");
        GpuResource::find_by_index(&mut conn, gpu_index)
            .await
            .expect("find gpu")
            .unwrap_or_else(|| panic!("gpu {gpu_index} not found"))
    }

    pub async fn gpus(&self) -> Vec<GpuResource> {
        let mut conn = self.core.store().pool().acquire().await.expect("acquire");
        GpuResource::list_all(&mut conn).await.expect("list gpus")
    }

    pub async fn history(&self, case_id: &str) -> Vec<CaseHistoryRow> {
        let mut conn = self.core.store().pool().acquire().await.expect("acquire");
        CaseHistoryRow::list_for_case(&mut conn, case_id)
            .await
            .expect("history")
    }

    /// Drain and decode an outbox queue
    pub async fn outbound(&self, queue: &str) -> Vec<MessageEnvelope> {
        self.messaging.take_envelopes(queue).await
    }

    pub fn file_transfer_queue(&self) -> String {
        self.core.config().queues.file_transfer.clone()
    }

    pub fn remote_executor_queue(&self) -> String {
        self.core.config().queues.remote_executor.clone()
    }

    pub fn inbox_queue(&self) -> String {
        self.core.config().queues.inbox.clone()
    }
}
