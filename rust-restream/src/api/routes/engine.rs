//! Engine lifecycle routes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use tracing::info;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::snapshot::EngineSnapshot;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_snapshot))
        .route("/start", post(start_engine))
        .route("/stop", post(stop_engine))
}

/// Current engine snapshot.
async fn get_snapshot(State(state): State<AppState>) -> Json<Arc<EngineSnapshot>> {
    Json(state.engine.snapshot())
}

/// Start publishing with the stored configuration. Starting a running
/// engine applies the stored configuration instead.
async fn start_engine(State(state): State<AppState>) -> ApiResult<Json<Arc<EngineSnapshot>>> {
    state.engine.start(state.store.snapshot()).await?;
    info!("Engine started via API");
    Ok(Json(state.engine.snapshot()))
}

async fn stop_engine(State(state): State<AppState>) -> ApiResult<Json<Arc<EngineSnapshot>>> {
    state.engine.stop().await?;
    info!("Engine stopped via API");
    Ok(Json(state.engine.snapshot()))
}
