//! # Tracing Module
//!
//! Console logging via the tracing ecosystem, designed for containerized
//! deployment where logs go to stdout and are collected externally.
//!
//! ## Correlation IDs
//!
//! Every case carries a `correlation_id` (UUID, stamped at admission) that is
//! copied onto every related queue message. Log statements about a case put
//! `correlation_id` as the first structured field so a single grep follows an
//! entire workflow across the Conductor and all workers.

use std::io::IsTerminal;

use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize console tracing for a Conductor process.
///
/// The log level comes from `RUST_LOG` when set, otherwise `info`. ANSI
/// colors are enabled only when stdout is a terminal. Calling this more than
/// once (tests) is a no-op after the first call.
pub fn init_tracing(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = fmt()
        .with_env_filter(filter)
        .with_ansi(std::io::stdout().is_terminal())
        .with_target(true)
        .finish()
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(service = service_name, "tracing initialized");
    }
}
