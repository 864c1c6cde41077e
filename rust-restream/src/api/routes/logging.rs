//! Logging API routes.
//!
//! View and change the log filter, and stream log lines as JSON over a
//! WebSocket.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{LoggingConfigResponse, ModuleInfo, UpdateLogFilterRequest};
use crate::api::server::AppState;
use crate::logging::{LoggingConfig, available_modules};

/// Interval between WebSocket heartbeat pings.
pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/filter", get(get_logging_config).put(update_logging_config))
        .route("/stream", get(logging_stream_ws))
}

fn logging_config(state: &AppState) -> ApiResult<Arc<LoggingConfig>> {
    state
        .logging_config
        .clone()
        .ok_or_else(|| ApiError::service_unavailable("Logging configuration not available"))
}

fn response(filter: String) -> LoggingConfigResponse {
    LoggingConfigResponse {
        filter,
        available_modules: available_modules()
            .into_iter()
            .map(|(name, desc)| ModuleInfo {
                name: name.to_string(),
                description: desc.to_string(),
            })
            .collect(),
    }
}

async fn get_logging_config(State(state): State<AppState>) -> ApiResult<Json<LoggingConfigResponse>> {
    let logging = logging_config(&state)?;
    Ok(Json(response(logging.get_filter())))
}

/// Apply a new filter directive and persist it for the next startup.
async fn update_logging_config(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let logging = logging_config(&state)?;

    logging
        .set_filter(&request.filter)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    if let Err(e) = state.store.set_log_filter(&request.filter).await {
        warn!("Failed to persist log filter: {}", e);
    }

    Ok(Json(response(logging.get_filter())))
}

async fn logging_stream_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let logging = logging_config(&state)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, logging)))
}

/// Forward log events to the client until either side goes away.
async fn handle_socket(socket: WebSocket, logging: Arc<LoggingConfig>) {
    let (mut sender, mut receiver) = socket.split();
    let mut log_rx = logging.subscribe();

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = log_rx.recv() => {
                match result {
                    Ok(event) => {
                        let Ok(json) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    // Slow client: drop what it missed.
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
        }
    }
}
