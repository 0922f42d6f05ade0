//! # Conductor
//!
//! Central workflow orchestrator for a distributed QA automation system.
//!
//! The Conductor advances each *case* (a unit of work discovered on a
//! filesystem) through a configured, ordered sequence of steps (uploads,
//! remote shell executions, and downloads) executed by dumb workers on a
//! remote compute host. It consumes events from a persistent message broker,
//! keeps per-case progress and the shared GPU pool in a single-file SQLite
//! store, and is the sole authority for workflow progression.
//!
//! ## Architecture
//!
//! - [`messaging`]: envelope format, `MessagingService` trait, RabbitMQ and
//!   in-memory providers
//! - [`models`]: row types and row-level queries for cases, history, GPU
//!   slots, and the scanned-case ledger
//! - [`state_machine`]: the case status DAG and the typed inbound/outbound
//!   event surface
//! - [`orchestration`]: the state store gateway, resource allocator,
//!   workflow definition, dispatcher, event router, workflow manager, and
//!   inbox consumer
//! - [`config`] / [`database`] / [`logging`] / [`errors`]: ambient plumbing

pub mod config;
pub mod database;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod state_machine;

pub use errors::{ConductorError, ConductorResult};
