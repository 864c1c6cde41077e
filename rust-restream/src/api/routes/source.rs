//! Source channel routes.

use axum::{Json, Router, extract::State, routing::get};
use tracing::info;

use crate::api::error::ApiResult;
use crate::api::models::{SourceResponse, UpdateSourceRequest};
use crate::api::server::AppState;
use crate::config::RestreamConfig;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_source).put(update_source))
}

fn source_response(state: &AppState, config: &RestreamConfig) -> SourceResponse {
    SourceResponse {
        channel: config.source.channel.clone(),
        quality: config.source.quality.clone(),
        state: state.engine.snapshot().source.clone(),
    }
}

async fn get_source(State(state): State<AppState>) -> Json<SourceResponse> {
    let config = state.store.snapshot();
    Json(source_response(&state, &config))
}

/// Change the channel (and optionally the quality). A running engine
/// picks the new channel up in an immediate cycle.
async fn update_source(
    State(state): State<AppState>,
    Json(request): Json<UpdateSourceRequest>,
) -> ApiResult<Json<SourceResponse>> {
    let config = state
        .apply_edit(move |store| async move {
            store
                .update_source(&request.channel, request.quality.as_deref())
                .await
        })
        .await?;
    let response = source_response(&state, &config);

    info!(channel = %response.channel, "Source changed via API");
    Ok(Json(response))
}
