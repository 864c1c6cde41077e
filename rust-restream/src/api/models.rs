//! API request and response models (DTOs).

use serde::{Deserialize, Serialize};

use crate::config::DestinationConfig;
use crate::destination::redact_endpoint;
use crate::snapshot::DestinationStatus;
use crate::source::SourceState;

// ============================================================================
// Destinations
// ============================================================================

/// Request to add a destination.
#[derive(Debug, Clone, Deserialize)]
pub struct AddDestinationRequest {
    #[serde(alias = "name")]
    pub id: String,
    #[serde(alias = "url")]
    pub endpoint_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl From<AddDestinationRequest> for DestinationConfig {
    fn from(request: AddDestinationRequest) -> Self {
        Self {
            id: request.id.trim().to_string(),
            endpoint_url: request.endpoint_url.trim().to_string(),
            enabled: request.enabled,
        }
    }
}

/// Request to enable or disable a destination.
#[derive(Debug, Clone, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

/// A configured destination together with its live status, if any.
///
/// The endpoint is always redacted.
#[derive(Debug, Clone, Serialize)]
pub struct DestinationResponse {
    pub id: String,
    pub endpoint: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DestinationStatus>,
}

impl DestinationResponse {
    pub fn new(config: &DestinationConfig, status: Option<DestinationStatus>) -> Self {
        Self {
            id: config.id.clone(),
            endpoint: redact_endpoint(&config.endpoint_url),
            enabled: config.enabled,
            status,
        }
    }
}

/// Request to test-publish to an endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TestDestinationRequest {
    #[serde(alias = "url")]
    pub endpoint_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestDestinationResponse {
    pub ok: bool,
}

// ============================================================================
// Source
// ============================================================================

/// Request to change the source channel.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSourceRequest {
    pub channel: String,
    pub quality: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceResponse {
    pub channel: String,
    pub quality: String,
    /// Last resolution made by the running engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SourceState>,
}

// ============================================================================
// Logging
// ============================================================================

/// Request to update the log filter.
#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

/// Response for logging configuration.
#[derive(Debug, Serialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub available_modules: Vec<ModuleInfo>,
}

/// Information about an available logging module.
#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}

// ============================================================================
// Health
// ============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub engine_running: bool,
    /// First line of `ffmpeg -version`, when the binary runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_version: Option<String>,
}
