//! # Case Model
//!
//! One row per unit of QA work. The `case_id` is the discovered directory
//! name and is globally unique; the correlation id is stamped at admission
//! and copied onto every related queue message.
//!
//! Status invariants enforced by the gateway:
//! - `PROCESSING` ⇒ `current_step` and (for execute steps) `resource_index`
//!   are populated
//! - any other status ⇒ `resource_index` is null
//! - `progress` never decreases while the case is non-terminal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use uuid::Uuid;

use crate::state_machine::CaseStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case_id: String,
    pub status: CaseStatus,
    pub current_step: Option<String>,
    pub resource_index: Option<i64>,
    pub progress: i64,
    pub correlation_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub terminal_at: Option<DateTime<Utc>>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

/// A parked case as returned by the FIFO wake query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParkedCase {
    pub case_id: String,
    /// The step that was blocked waiting for a GPU
    pub intended_step: String,
    pub correlation_id: Uuid,
    pub parked_at: DateTime<Utc>,
}

// The correlation column is stored as hyphenated TEXT so external readers
// (the dashboard) see it verbatim; SQLite's native Uuid codec is blob-based,
// so the column goes through String and is parsed here.
fn correlation_from_text(raw: String) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: "correlation_id".to_string(),
        source: Box::new(e),
    })
}

impl<'r> FromRow<'r, SqliteRow> for CaseRecord {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            case_id: row.try_get("case_id")?,
            status: row.try_get("status")?,
            current_step: row.try_get("current_step")?,
            resource_index: row.try_get("resource_index")?,
            progress: row.try_get("progress")?,
            correlation_id: correlation_from_text(row.try_get("correlation_id")?)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            terminal_at: row.try_get("terminal_at")?,
            error_kind: row.try_get("error_kind")?,
            error_message: row.try_get("error_message")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for ParkedCase {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            case_id: row.try_get("case_id")?,
            intended_step: row.try_get("intended_step")?,
            correlation_id: correlation_from_text(row.try_get("correlation_id")?)?,
            parked_at: row.try_get("parked_at")?,
        })
    }
}

impl CaseRecord {
    pub async fn find_by_id(
        conn: &mut SqliteConnection,
        case_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT case_id, status, current_step, resource_index, progress, \
                    correlation_id, created_at, updated_at, terminal_at, \
                    error_kind, error_message \
             FROM cases WHERE case_id = ?",
        )
        .bind(case_id)
        .fetch_optional(conn)
        .await
    }

    /// Insert a freshly admitted case in `NEW` status.
    pub async fn insert_new(
        conn: &mut SqliteConnection,
        case_id: &str,
        correlation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query(
            "INSERT INTO cases (case_id, status, progress, correlation_id, created_at, updated_at) \
             VALUES (?, 'NEW', 0, ?, ?, ?)",
        )
        .bind(case_id)
        .bind(correlation_id.to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(Self {
            case_id: case_id.to_string(),
            status: CaseStatus::New,
            current_step: None,
            resource_index: None,
            progress: 0,
            correlation_id,
            created_at: now,
            updated_at: now,
            terminal_at: None,
            error_kind: None,
            error_message: None,
        })
    }

    /// Move the case into `PROCESSING` on the given step.
    pub async fn update_step(
        conn: &mut SqliteConnection,
        case_id: &str,
        step: &str,
        resource_index: Option<i64>,
        progress: i64,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE cases \
             SET status = 'PROCESSING', current_step = ?, resource_index = ?, \
                 progress = ?, updated_at = ? \
             WHERE case_id = ?",
        )
        .bind(step)
        .bind(resource_index)
        .bind(progress)
        .bind(now)
        .bind(case_id)
        .execute(conn)
        .await
        .map(|_| ())
    }

    /// Park the case in `PENDING_RESOURCE` with the step it is blocked on.
    /// `updated_at` becomes the park timestamp used for FIFO wake order.
    pub async fn park(
        conn: &mut SqliteConnection,
        case_id: &str,
        intended_step: &str,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE cases \
             SET status = 'PENDING_RESOURCE', current_step = ?, resource_index = NULL, \
                 updated_at = ? \
             WHERE case_id = ?",
        )
        .bind(intended_step)
        .bind(now)
        .bind(case_id)
        .execute(conn)
        .await
        .map(|_| ())
    }

    /// Move the case to a terminal status, clearing the resource column.
    pub async fn set_terminal(
        conn: &mut SqliteConnection,
        case_id: &str,
        status: CaseStatus,
        progress: Option<i64>,
        error: Option<(&str, &str)>,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        let (error_kind, error_message) = match error {
            Some((kind, message)) => (Some(kind), Some(message)),
            None => (None, None),
        };
        sqlx::query(
            "UPDATE cases \
             SET status = ?, resource_index = NULL, \
                 progress = COALESCE(?, progress), \
                 error_kind = ?, error_message = ?, \
                 updated_at = ?, terminal_at = ? \
             WHERE case_id = ?",
        )
        .bind(status)
        .bind(progress)
        .bind(error_kind)
        .bind(error_message)
        .bind(now)
        .bind(now)
        .bind(case_id)
        .execute(conn)
        .await
        .map(|_| ())
    }

    /// Parked cases in wake order: oldest park first, ties broken by case id.
    pub async fn list_parked(conn: &mut SqliteConnection) -> Result<Vec<ParkedCase>, sqlx::Error> {
        sqlx::query_as::<_, ParkedCase>(
            "SELECT case_id, current_step AS intended_step, correlation_id, \
                    updated_at AS parked_at \
             FROM cases \
             WHERE status = 'PENDING_RESOURCE' AND current_step IS NOT NULL \
             ORDER BY updated_at ASC, case_id ASC",
        )
        .fetch_all(conn)
        .await
    }
}
