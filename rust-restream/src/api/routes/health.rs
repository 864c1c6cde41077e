//! Health check routes.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::error::ApiResult;
use crate::api::models::HealthResponse;
use crate::api::server::AppState;
use crate::encoder::FfmpegLauncher;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

/// Liveness, version and uptime, plus whether ffmpeg is runnable.
async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let binary_path = state.engine.config().encoder.binary_path.clone();
    let ffmpeg_version = tokio::task::spawn_blocking(move || FfmpegLauncher::detect_version(&binary_path))
        .await
        .ok()
        .flatten();

    let status = if ffmpeg_version.is_some() {
        "healthy"
    } else {
        "degraded"
    };

    Ok(Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        engine_running: state.engine.is_running().await,
        ffmpeg_version,
    }))
}
