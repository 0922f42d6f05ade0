//! # Conductor Core
//!
//! Construction and lifecycle of one Conductor instance. There is no
//! process-wide state: each instance owns its store handle, broker service,
//! and consumer, with configuration passed in by value.
//!
//! Startup order matches the operational contract: validate the workflow,
//! open and migrate the store, seed the GPU pool on first boot, declare
//! every queue (with its dead-letter pair), then start consuming.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::ConductorConfig;
use crate::database::{connect_store, run_migrations, seed_gpu_pool};
use crate::errors::ConductorResult;
use crate::messaging::MessagingService;

use super::allocator::ResourceAllocator;
use super::consumer::InboxConsumer;
use super::dispatcher::CommandDispatcher;
use super::manager::WorkflowManager;
use super::router::EventRouter;
use super::state_store::StateStore;
use super::workflow::WorkflowDefinition;

#[derive(Debug)]
pub struct ConductorCore {
    config: ConductorConfig,
    store: StateStore,
    messaging: Arc<dyn MessagingService>,
    consumer: InboxConsumer,
}

impl ConductorCore {
    /// Wire every component against the given broker service.
    pub async fn bootstrap(
        config: ConductorConfig,
        messaging: Arc<dyn MessagingService>,
    ) -> ConductorResult<Self> {
        // Workflow problems are startup failures, never runtime surprises
        let workflow = Arc::new(WorkflowDefinition::from_config(&config)?);

        let pool = connect_store(&config.store).await?;
        run_migrations(&pool).await?;
        seed_gpu_pool(&pool, config.resources.gpu_count).await?;
        let store = StateStore::new(pool, &config.store);

        for queue in [
            &config.queues.inbox,
            &config.queues.file_transfer,
            &config.queues.remote_executor,
        ] {
            messaging.ensure_queue(queue).await?;
        }

        let allocator =
            ResourceAllocator::new(store.clone(), messaging.clone(), &config.queues.inbox);
        let dispatcher = CommandDispatcher::new(
            messaging.clone(),
            workflow.clone(),
            config.queues.clone(),
            config.paths.clone(),
        );
        let manager = WorkflowManager::new(store.clone(), workflow, dispatcher, allocator);
        let router = Arc::new(EventRouter::new(manager));
        let consumer = InboxConsumer::new(
            messaging.clone(),
            router,
            &config.queues.inbox,
            config.broker.max_retry_count,
            config.broker.prefetch_count,
        );

        tracing::info!(
            inbox = %config.queues.inbox,
            provider = messaging.provider_name(),
            store = %config.store.path,
            "conductor core ready"
        );

        Ok(Self {
            config,
            store,
            messaging,
            consumer,
        })
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn consumer(&self) -> &InboxConsumer {
        &self.consumer
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Consume the inbox until shutdown flips. The in-flight handler always
    /// runs to completion.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> ConductorResult<()> {
        self.messaging.health_check().await?;
        self.consumer.run(shutdown).await
    }

    /// Close the store pool. The broker connection drops with the service.
    pub async fn close(&self) {
        self.store.pool().close().await;
        tracing::info!("conductor core stopped");
    }
}
