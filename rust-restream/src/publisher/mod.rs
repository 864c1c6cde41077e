//! Destination publishers.
//!
//! A publisher owns exactly one encoder process per destination and is the
//! only thing that ever signals or reaps it.

mod handle;
mod service;

pub use handle::{PublisherHandle, PublisherState};
pub use service::{Publisher, PublisherSettings};
