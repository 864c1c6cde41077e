//! Destination management routes.
//!
//! Every edit is persisted through the config store first and then handed
//! to the engine, which reconciles in its next cycle.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    AddDestinationRequest, DestinationResponse, SetEnabledRequest, TestDestinationRequest,
    TestDestinationResponse,
};
use crate::api::server::AppState;
use crate::config::{DestinationConfig, RestreamConfig};
use crate::destination::validate_endpoint;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_destinations).post(add_destination))
        .route("/test", post(test_destination))
        .route("/{id}", delete(remove_destination))
        .route("/{id}/enabled", put(set_enabled))
}

fn describe(state: &AppState, config: &DestinationConfig) -> DestinationResponse {
    let status = state.engine.snapshot().destination(&config.id).cloned();
    DestinationResponse::new(config, status)
}

fn find<'a>(config: &'a RestreamConfig, id: &str) -> ApiResult<&'a DestinationConfig> {
    config
        .destinations
        .iter()
        .find(|d| d.id == id)
        .ok_or_else(|| ApiError::not_found(format!("destination '{id}' not found")))
}

async fn list_destinations(State(state): State<AppState>) -> Json<Vec<DestinationResponse>> {
    let config = state.store.snapshot();
    Json(
        config
            .destinations
            .iter()
            .map(|d| describe(&state, d))
            .collect(),
    )
}

async fn add_destination(
    State(state): State<AppState>,
    Json(request): Json<AddDestinationRequest>,
) -> ApiResult<(StatusCode, Json<DestinationResponse>)> {
    let destination = DestinationConfig::from(request);
    let added = destination.clone();
    state
        .apply_edit(move |store| async move { store.add_destination(added).await })
        .await?;

    Ok((StatusCode::CREATED, Json(describe(&state, &destination))))
}

async fn remove_destination(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .apply_edit(move |store| async move { store.remove_destination(&id).await })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SetEnabledRequest>,
) -> ApiResult<Json<DestinationResponse>> {
    let enabled = request.enabled;
    let target = id.clone();
    let config = state
        .apply_edit(move |store| async move { store.set_destination_enabled(&target, enabled).await })
        .await?;
    Ok(Json(describe(&state, find(&config, &id)?)))
}

/// Publish a short placeholder stream to the endpoint and report whether
/// the encoder completed.
async fn test_destination(
    State(state): State<AppState>,
    Json(request): Json<TestDestinationRequest>,
) -> ApiResult<Json<TestDestinationResponse>> {
    validate_endpoint(&request.endpoint_url)?;
    let ok = state.engine.test_destination(&request.endpoint_url).await;
    Ok(Json(TestDestinationResponse { ok }))
}
