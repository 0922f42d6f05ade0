//! # Database
//!
//! SQLite connection management and schema migrations for the state store.
//!
//! The store is a single database file shared with external readers (the
//! dashboard) and one external writer that only touches GPU metric columns.
//! WAL journal mode keeps those readers from ever blocking the Conductor's
//! writer transactions.

mod connection;
mod migrations;

pub use connection::connect_store;
pub use migrations::{run_migrations, seed_gpu_pool, MIGRATOR};
