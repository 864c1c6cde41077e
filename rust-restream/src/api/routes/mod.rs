//! API route modules.
//!
//! Organizes routes by resource type.

pub mod destinations;
pub mod engine;
pub mod events;
pub mod health;
pub mod logging;
pub mod source;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/health", health::router())
        .nest("/api/engine", engine::router())
        .nest("/api/destinations", destinations::router())
        .nest("/api/source", source::router())
        .nest("/api/logs", logging::router())
        .nest("/api/events", events::router())
        .with_state(state)
}
