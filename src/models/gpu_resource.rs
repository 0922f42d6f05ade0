//! # GPU Resource Model
//!
//! One row per shareable GPU slot. The Conductor writes only `state` and
//! `owner_case_id`; utilization, memory, and temperature columns belong to
//! the external metrics curator and are read-only here (including
//! `updated_at`, which tracks the metric refresh, not reservations).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

use crate::state_machine::states::GpuState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct GpuResource {
    pub gpu_index: i64,
    pub gpu_id: String,
    pub state: GpuState,
    pub owner_case_id: Option<String>,
    pub utilization: f64,
    pub memory_used: i64,
    pub memory_total: i64,
    pub temperature: f64,
    pub updated_at: DateTime<Utc>,
}

impl GpuResource {
    /// Atomically reserve the lowest-indexed FREE slot for a case.
    ///
    /// Lowest-index-first is deterministic, which keeps tests reproducible.
    /// Returns the reserved index, or `None` when every slot is taken.
    pub async fn reserve_lowest_free(
        conn: &mut SqliteConnection,
        case_id: &str,
    ) -> Result<Option<i64>, sqlx::Error> {
        let reserved: Option<(i64,)> = sqlx::query_as(
            "UPDATE gpu_resources SET state = 'RESERVED', owner_case_id = ? \
             WHERE gpu_index = ( \
                 SELECT gpu_index FROM gpu_resources \
                 WHERE state = 'FREE' ORDER BY gpu_index ASC LIMIT 1 \
             ) \
             RETURNING gpu_index",
        )
        .bind(case_id)
        .fetch_optional(conn)
        .await?;

        Ok(reserved.map(|(index,)| index))
    }

    /// Release a slot by index. Returns whether the slot was actually
    /// reserved; releasing a FREE slot is a no-op the caller may log.
    pub async fn release(
        conn: &mut SqliteConnection,
        gpu_index: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE gpu_resources SET state = 'FREE', owner_case_id = NULL \
             WHERE gpu_index = ? AND state = 'RESERVED'",
        )
        .bind(gpu_index)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Release whatever slot a case owns. Returns the freed index, if any.
    pub async fn release_owned_by(
        conn: &mut SqliteConnection,
        case_id: &str,
    ) -> Result<Option<i64>, sqlx::Error> {
        let released: Option<(i64,)> = sqlx::query_as(
            "UPDATE gpu_resources SET state = 'FREE', owner_case_id = NULL \
             WHERE owner_case_id = ? AND state = 'RESERVED' \
             RETURNING gpu_index",
        )
        .bind(case_id)
        .fetch_optional(conn)
        .await?;
        Ok(released.map(|(index,)| index))
    }

    pub async fn find_by_index(
        conn: &mut SqliteConnection,
        gpu_index: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT gpu_index, gpu_id, state, owner_case_id, utilization, \
                    memory_used, memory_total, temperature, updated_at \
             FROM gpu_resources WHERE gpu_index = ?",
        )
        .bind(gpu_index)
        .fetch_optional(conn)
        .await
    }

    pub async fn list_all(conn: &mut SqliteConnection) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT gpu_index, gpu_id, state, owner_case_id, utilization, \
                    memory_used, memory_total, temperature, updated_at \
             FROM gpu_resources ORDER BY gpu_index ASC",
        )
        .fetch_all(conn)
        .await
    }
}
