//! Append-only audit log of case state transitions.
//!
//! Written by the gateway in the same transaction as the state change, so
//! the history can never disagree with the case row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

use crate::state_machine::CaseStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CaseHistoryRow {
    pub id: i64,
    pub case_id: String,
    pub ts: DateTime<Utc>,
    pub from_status: Option<CaseStatus>,
    pub to_status: CaseStatus,
    pub step: Option<String>,
    pub cause: Option<String>,
}

/// One transition to append
#[derive(Debug, Clone)]
pub struct NewTransition<'a> {
    pub case_id: &'a str,
    pub from_status: Option<CaseStatus>,
    pub to_status: CaseStatus,
    pub step: Option<&'a str>,
    pub cause: &'a str,
}

impl CaseHistoryRow {
    pub async fn record(
        conn: &mut SqliteConnection,
        transition: NewTransition<'_>,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO case_history (case_id, ts, from_status, to_status, step, cause) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(transition.case_id)
        .bind(now)
        .bind(transition.from_status)
        .bind(transition.to_status)
        .bind(transition.step)
        .bind(transition.cause)
        .execute(conn)
        .await
        .map(|_| ())
    }

    /// All transitions for a case, oldest first.
    pub async fn list_for_case(
        conn: &mut SqliteConnection,
        case_id: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT id, case_id, ts, from_status, to_status, step, cause \
             FROM case_history WHERE case_id = ? ORDER BY id ASC",
        )
        .bind(case_id)
        .fetch_all(conn)
        .await
    }
}
