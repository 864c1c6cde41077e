//! rust-restream library crate.
//!
//! Resolves one live source and republishes it, re-encoded, to any number
//! of RTMP destinations, falling back to a placeholder while the source is
//! offline.

pub mod api;
pub mod config;
pub mod destination;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod logging;
pub mod placeholder;
pub mod publisher;
pub mod snapshot;
pub mod source;
pub mod supervisor;

pub use engine::RestreamEngine;
pub use error::{Error, Result};
