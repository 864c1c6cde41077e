//! HTTP control surface.
//!
//! Exposes the engine's start/stop/status operations, destination and
//! source management, and WebSocket streams of logs and engine events.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::ApiServer;
