//! Case state machine vocabulary.
//!
//! [`states`] defines the status DAG a case moves through; [`events`] defines
//! the closed set of inbound events and outbound commands that drive it.

pub mod events;
pub mod states;

pub use events::{InboundEvent, OutboundCommand};
pub use states::CaseStatus;
