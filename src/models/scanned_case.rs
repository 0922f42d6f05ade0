//! Scanned-case ledger.
//!
//! The set of case identifiers ever admitted. Makes `new_case_found`
//! idempotent: a duplicate discovery inserts nothing and the event is
//! dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ScannedCase {
    pub case_id: String,
    pub discovered_at: DateTime<Utc>,
}

impl ScannedCase {
    /// Record a case in the ledger. Returns `true` when the case was new,
    /// `false` when it had been admitted before.
    pub async fn admit(
        conn: &mut SqliteConnection,
        case_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO scanned_cases (case_id, discovered_at) VALUES (?, ?)",
        )
        .bind(case_id)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_for_case(
        conn: &mut SqliteConnection,
        case_id: &str,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM scanned_cases WHERE case_id = ?")
            .bind(case_id)
            .fetch_one(conn)
            .await
    }
}
