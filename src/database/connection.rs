//! SQLite pool construction.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::config::StoreConfig;

/// Open (creating if missing) the state store database file.
///
/// Pragmas match the operational profile: WAL for concurrent readers,
/// NORMAL synchronous, a 30s busy timeout, and enforced foreign keys.
pub async fn connect_store(config: &StoreConfig) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.path))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
        .foreign_keys(true)
        .pragma("temp_store", "MEMORY");

    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
}
