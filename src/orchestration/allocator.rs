//! # Resource Allocator
//!
//! Thin policy layer over the gateway for the shared GPU pool:
//!
//! - **Reservation on demand**: execute steps reserve the lowest-indexed
//!   free slot inside the caller's open transaction; an exhausted pool means
//!   the case parks.
//! - **Release-and-wake**: after a slot is freed, the oldest parked case
//!   (FIFO by park timestamp, case-id tie-break) is woken by publishing the
//!   internal `retry_parked` event back onto the Conductor's own inbox.
//!   Routing the wake through the broker keeps the single event loop intact
//!   and makes the wake survive a restart.

use std::sync::Arc;

use serde_json::json;

use crate::messaging::{MessageEnvelope, MessagingService};
use crate::state_machine::events::commands;

use super::state_store::{StateStore, StoreError, StoreTransaction};

#[derive(Debug, Clone)]
pub struct ResourceAllocator {
    store: StateStore,
    messaging: Arc<dyn MessagingService>,
    inbox_queue: String,
}

impl ResourceAllocator {
    pub fn new(
        store: StateStore,
        messaging: Arc<dyn MessagingService>,
        inbox_queue: impl Into<String>,
    ) -> Self {
        Self {
            store,
            messaging,
            inbox_queue: inbox_queue.into(),
        }
    }

    /// Reserve a slot for a case within the caller's transaction.
    pub async fn try_reserve(
        &self,
        tx: &mut StoreTransaction<'_>,
        case_id: &str,
    ) -> Result<Option<i64>, StoreError> {
        let reserved = tx.try_reserve_gpu(case_id).await?;
        match reserved {
            Some(gpu_index) => tracing::info!(case_id, gpu_index, "reserved GPU slot"),
            None => tracing::info!(case_id, "no GPU slot available"),
        }
        Ok(reserved)
    }

    /// Release a held slot within the caller's transaction. The caller must
    /// follow a successful commit with [`Self::wake_next_parked`].
    pub async fn release(
        &self,
        tx: &mut StoreTransaction<'_>,
        gpu_index: i64,
    ) -> Result<(), StoreError> {
        let was_reserved = tx.release_gpu(gpu_index).await?;
        if was_reserved {
            tracing::info!(gpu_index, "released GPU slot");
        } else {
            tracing::warn!(gpu_index, "release of a slot that was not reserved");
        }
        Ok(())
    }

    /// Wake exactly one parked case, oldest park first.
    ///
    /// Failures here are logged and swallowed: the parked list is a hint,
    /// re-examined on the next release, not ground truth.
    pub async fn wake_next_parked(&self) {
        let parked = match self.store.next_parked_case().await {
            Ok(Some(parked)) => parked,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "failed to query parked cases for wake");
                return;
            }
        };

        let envelope = MessageEnvelope::new(
            commands::RETRY_PARKED,
            json!({ "case_id": parked.case_id }),
            parked.correlation_id,
        );

        match self.messaging.publish(&self.inbox_queue, &envelope).await {
            Ok(()) => tracing::info!(
                correlation_id = %parked.correlation_id,
                case_id = %parked.case_id,
                intended_step = %parked.intended_step,
                "woke parked case"
            ),
            Err(e) => tracing::warn!(
                correlation_id = %parked.correlation_id,
                case_id = %parked.case_id,
                error = %e,
                "failed to publish wake for parked case"
            ),
        }
    }
}
