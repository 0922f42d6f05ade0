//! # Models
//!
//! Row types and row-level queries for the state store. Every query is a
//! parameterized statement; callers pass a `&mut SqliteConnection` so the
//! gateway can compose several row operations into one transaction.

pub mod case;
pub mod case_history;
pub mod gpu_resource;
pub mod scanned_case;

pub use case::{CaseRecord, ParkedCase};
pub use case_history::{CaseHistoryRow, NewTransition};
pub use gpu_resource::GpuResource;
pub use scanned_case::ScannedCase;
