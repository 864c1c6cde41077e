//! Redistribution supervisor.
//!
//! One supervisor task polls the source, decides the input for the cycle,
//! reconciles per-destination workers against the configuration and
//! publishes an [`EngineSnapshot`](crate::snapshot::EngineSnapshot).

mod messages;
pub mod restart_backoff;
mod service;
mod worker;

pub use messages::CycleDecision;
pub use restart_backoff::{BackoffPolicy, RestartBackoff};
pub use service::Supervisor;
