//! # State Store Gateway
//!
//! Single gate for all persistence. Coarse operations are exposed over an
//! explicit [`StoreTransaction`] so the workflow manager can run one inbound
//! event as exactly one SQLite transaction (including the atomic pairing of
//! a GPU reservation with the owning case-row update) and place the
//! outbound publish between the last mutation and the commit.
//!
//! Convenience wrappers on [`StateStore`] run self-contained operations
//! (admit, terminal transitions, reads) as single transactions with the
//! in-process busy-retry policy applied.

use std::time::Duration;

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::models::{CaseHistoryRow, CaseRecord, GpuResource, NewTransition, ParkedCase, ScannedCase};
use crate::state_machine::CaseStatus;

/// Errors from gateway operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Case not found: {case_id}")]
    NotFound { case_id: String },

    #[error("Conflict for case {case_id}: {message}")]
    Conflict { case_id: String, message: String },

    #[error("Store busy: {message}")]
    Busy { message: String },

    #[error("Database error: {message}")]
    Database { message: String },
}

impl StoreError {
    pub fn not_found(case_id: impl Into<String>) -> Self {
        Self::NotFound {
            case_id: case_id.into(),
        }
    }

    pub fn conflict(case_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            case_id: case_id.into(),
            message: message.into(),
        }
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy {
            message: message.into(),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            StoreError::busy(err.to_string())
        } else {
            StoreError::database(err.to_string())
        }
    }
}

/// Whether a sqlx error is SQLite contention that an in-process retry can
/// clear.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_lowercase();
            message.contains("database is locked")
                || message.contains("database table is locked")
                || message.contains("database is busy")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Outcome of admitting a case through the scanned ledger
#[derive(Debug, Clone, PartialEq)]
pub enum AdmitOutcome {
    /// First sighting; a NEW case row was created
    Admitted(CaseRecord),
    /// The ledger already knew this case
    AlreadyPresent(CaseRecord),
}

impl AdmitOutcome {
    pub fn case(&self) -> &CaseRecord {
        match self {
            Self::Admitted(case) | Self::AlreadyPresent(case) => case,
        }
    }
}

/// Typed, transactional access to cases, workflow progress, resources, and
/// the scanned-case ledger.
#[derive(Debug, Clone)]
pub struct StateStore {
    pool: SqlitePool,
    busy_retry_attempts: u32,
    busy_retry_base: Duration,
}

impl StateStore {
    pub fn new(pool: SqlitePool, config: &StoreConfig) -> Self {
        Self {
            pool,
            busy_retry_attempts: config.busy_retry_attempts.max(1),
            busy_retry_base: Duration::from_millis(config.busy_retry_base_ms),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn busy_retry_attempts(&self) -> u32 {
        self.busy_retry_attempts
    }

    /// Capped exponential backoff delay before retry number `attempt`
    pub fn busy_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(8));
        (self.busy_retry_base * factor).min(Duration::from_millis(400))
    }

    /// Open a gateway transaction.
    pub async fn begin(&self) -> Result<StoreTransaction<'_>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(StoreTransaction { tx })
    }

    /// Run a self-contained operation with busy retries.
    async fn with_busy_retry<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Err(StoreError::Busy { message }) if attempt + 1 < self.busy_retry_attempts => {
                    attempt += 1;
                    let delay = self.busy_backoff(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %message,
                        "store busy, retrying in-process"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Admit a case: ledger insert plus NEW case row, atomically. Duplicate
    /// admissions are a no-op that reports the existing record.
    pub async fn admit_case(&self, case_id: &str) -> Result<AdmitOutcome, StoreError> {
        self.with_busy_retry("admit_case", move || {
            let store = self;
            async move {
                let mut tx = store.begin().await?;
                let outcome = tx.admit_case(case_id).await?;
                tx.commit().await?;
                Ok(outcome)
            }
        })
        .await
    }

    pub async fn load_case(&self, case_id: &str) -> Result<Option<CaseRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(CaseRecord::find_by_id(&mut conn, case_id).await?)
    }

    /// Terminal transition to COMPLETED. Releases any held slot in the same
    /// transaction and returns its index so the caller can wake a parked
    /// case.
    pub async fn mark_completed(&self, case_id: &str) -> Result<Option<i64>, StoreError> {
        self.with_busy_retry("mark_completed", move || {
            let store = self;
            async move {
                let mut tx = store.begin().await?;
                let case = tx
                    .load_case(case_id)
                    .await?
                    .ok_or_else(|| StoreError::not_found(case_id))?;
                let released = tx.mark_completed(&case).await?;
                tx.commit().await?;
                Ok(released)
            }
        })
        .await
    }

    /// Terminal transition to FAILED with the carried error fields.
    pub async fn mark_failed(
        &self,
        case_id: &str,
        error_kind: &str,
        error_message: &str,
    ) -> Result<Option<i64>, StoreError> {
        self.with_busy_retry("mark_failed", move || {
            let store = self;
            async move {
                let mut tx = store.begin().await?;
                let case = tx
                    .load_case(case_id)
                    .await?
                    .ok_or_else(|| StoreError::not_found(case_id))?;
                let released = tx.mark_failed(&case, error_kind, error_message).await?;
                tx.commit().await?;
                Ok(released)
            }
        })
        .await
    }

    /// Release a slot outside any case transition. Idempotent: releasing an
    /// already-free slot logs a warning and does nothing.
    pub async fn release_gpu(&self, gpu_index: i64) -> Result<(), StoreError> {
        self.with_busy_retry("release_gpu", move || {
            let store = self;
            async move {
                let mut tx = store.begin().await?;
                let was_reserved = tx.release_gpu(gpu_index).await?;
                tx.commit().await?;
                if !was_reserved {
                    tracing::warn!(gpu_index, "release of a slot that was not reserved");
                }
                Ok(())
            }
        })
        .await
    }

    /// Parked cases in FIFO wake order (oldest park first, case-id
    /// tie-break).
    pub async fn list_parked_cases(&self) -> Result<Vec<ParkedCase>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(CaseRecord::list_parked(&mut conn).await?)
    }

    /// The next case to wake, if any.
    pub async fn next_parked_case(&self) -> Result<Option<ParkedCase>, StoreError> {
        Ok(self.list_parked_cases().await?.into_iter().next())
    }
}

/// One open gateway transaction. All mutations observe the status DAG; the
/// transaction is rolled back by drop unless [`commit`](Self::commit) runs.
#[derive(Debug)]
pub struct StoreTransaction<'a> {
    tx: Transaction<'a, Sqlite>,
}

impl StoreTransaction<'_> {
    pub async fn commit(self) -> Result<(), StoreError> {
        Ok(self.tx.commit().await?)
    }

    pub async fn load_case(&mut self, case_id: &str) -> Result<Option<CaseRecord>, StoreError> {
        Ok(CaseRecord::find_by_id(&mut self.tx, case_id).await?)
    }

    /// Ledger insert plus NEW case row; see [`StateStore::admit_case`].
    pub async fn admit_case(&mut self, case_id: &str) -> Result<AdmitOutcome, StoreError> {
        let now = Utc::now();
        let inserted = ScannedCase::admit(&mut self.tx, case_id, now).await?;

        if !inserted {
            if let Some(existing) = CaseRecord::find_by_id(&mut self.tx, case_id).await? {
                return Ok(AdmitOutcome::AlreadyPresent(existing));
            }
            // Ledger row without a case row: a previous admission was
            // interrupted between statements. Recreate the case row.
            tracing::warn!(case_id, "ledger entry without case row, recreating");
        }

        let correlation_id = Uuid::new_v4();
        let case = CaseRecord::insert_new(&mut self.tx, case_id, correlation_id, now).await?;
        CaseHistoryRow::record(
            &mut self.tx,
            NewTransition {
                case_id,
                from_status: None,
                to_status: CaseStatus::New,
                step: None,
                cause: "case admitted",
            },
            now,
        )
        .await?;

        Ok(AdmitOutcome::Admitted(case))
    }

    /// Reserve the lowest-indexed FREE slot for a case, or `None` when the
    /// pool is exhausted. The owning case row must be updated in this same
    /// transaction.
    pub async fn try_reserve_gpu(&mut self, case_id: &str) -> Result<Option<i64>, StoreError> {
        Ok(GpuResource::reserve_lowest_free(&mut self.tx, case_id).await?)
    }

    /// Flip a slot back to FREE. Returns whether it was actually reserved.
    pub async fn release_gpu(&mut self, gpu_index: i64) -> Result<bool, StoreError> {
        Ok(GpuResource::release(&mut self.tx, gpu_index).await?)
    }

    /// Move the case into PROCESSING on `step`, recording resource,
    /// progress, and a history row. Conflicts when the case is terminal.
    pub async fn advance_to_step(
        &mut self,
        case: &CaseRecord,
        step: &str,
        resource_index: Option<i64>,
        progress: i64,
    ) -> Result<(), StoreError> {
        if case.status.is_terminal() {
            return Err(StoreError::conflict(
                &case.case_id,
                format!("cannot advance terminal case in status {}", case.status),
            ));
        }

        let now = Utc::now();
        CaseRecord::update_step(&mut self.tx, &case.case_id, step, resource_index, progress, now)
            .await?;
        CaseHistoryRow::record(
            &mut self.tx,
            NewTransition {
                case_id: &case.case_id,
                from_status: Some(case.status),
                to_status: CaseStatus::Processing,
                step: Some(step),
                cause: "workflow step dispatched",
            },
            now,
        )
        .await?;
        Ok(())
    }

    /// Park the case waiting for a GPU. A case that is already parked on the
    /// same step is left untouched so its original park timestamp keeps its
    /// place in the FIFO wake order.
    pub async fn park_for_resource(
        &mut self,
        case: &CaseRecord,
        intended_step: &str,
    ) -> Result<(), StoreError> {
        if case.status.is_terminal() {
            return Err(StoreError::conflict(
                &case.case_id,
                format!("cannot park terminal case in status {}", case.status),
            ));
        }
        if case.resource_index.is_some() {
            return Err(StoreError::conflict(
                &case.case_id,
                "cannot park a case that holds a GPU slot",
            ));
        }
        if case.status == CaseStatus::PendingResource
            && case.current_step.as_deref() == Some(intended_step)
        {
            tracing::debug!(
                case_id = %case.case_id,
                intended_step,
                "case already parked, keeping original park timestamp"
            );
            return Ok(());
        }

        let now = Utc::now();
        CaseRecord::park(&mut self.tx, &case.case_id, intended_step, now).await?;
        CaseHistoryRow::record(
            &mut self.tx,
            NewTransition {
                case_id: &case.case_id,
                from_status: Some(case.status),
                to_status: CaseStatus::PendingResource,
                step: Some(intended_step),
                cause: "waiting for available GPU",
            },
            now,
        )
        .await?;
        Ok(())
    }

    /// Terminal transition to COMPLETED; see [`StateStore::mark_completed`].
    pub async fn mark_completed(&mut self, case: &CaseRecord) -> Result<Option<i64>, StoreError> {
        if case.status.is_terminal() {
            return Err(StoreError::conflict(
                &case.case_id,
                format!("case already terminal in status {}", case.status),
            ));
        }

        let now = Utc::now();
        let released = GpuResource::release_owned_by(&mut self.tx, &case.case_id).await?;
        CaseRecord::set_terminal(
            &mut self.tx,
            &case.case_id,
            CaseStatus::Completed,
            Some(100),
            None,
            now,
        )
        .await?;
        CaseHistoryRow::record(
            &mut self.tx,
            NewTransition {
                case_id: &case.case_id,
                from_status: Some(case.status),
                to_status: CaseStatus::Completed,
                step: case.current_step.as_deref(),
                cause: "all workflow steps completed",
            },
            now,
        )
        .await?;
        Ok(released)
    }

    /// Terminal transition to FAILED; see [`StateStore::mark_failed`].
    pub async fn mark_failed(
        &mut self,
        case: &CaseRecord,
        error_kind: &str,
        error_message: &str,
    ) -> Result<Option<i64>, StoreError> {
        if case.status.is_terminal() {
            return Err(StoreError::conflict(
                &case.case_id,
                format!("case already terminal in status {}", case.status),
            ));
        }

        let now = Utc::now();
        let released = GpuResource::release_owned_by(&mut self.tx, &case.case_id).await?;
        CaseRecord::set_terminal(
            &mut self.tx,
            &case.case_id,
            CaseStatus::Failed,
            None,
            Some((error_kind, error_message)),
            now,
        )
        .await?;
        CaseHistoryRow::record(
            &mut self.tx,
            NewTransition {
                case_id: &case.case_id,
                from_status: Some(case.status),
                to_status: CaseStatus::Failed,
                step: case.current_step.as_deref(),
                cause: error_message,
            },
            now,
        )
        .await?;
        Ok(released)
    }
}
