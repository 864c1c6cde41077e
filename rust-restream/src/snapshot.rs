//! Immutable engine status snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::destination::redact_endpoint;
use crate::placeholder::InputKind;
use crate::publisher::{PublisherHandle, PublisherState};
use crate::source::SourceState;

/// Status of one destination's publisher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationStatus {
    pub id: String,
    /// Endpoint with the stream key masked.
    pub endpoint: String,
    pub state: PublisherState,
    pub restart_count: u64,
    pub input: InputKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_output_progress_at: Option<DateTime<Utc>>,
    /// Last supervisor cycle this status reflects.
    pub cycle: u64,
}

impl DestinationStatus {
    pub fn from_handle(handle: &PublisherHandle, cycle: u64) -> Self {
        Self {
            id: handle.destination_id().to_string(),
            endpoint: redact_endpoint(&handle.destination().endpoint_url),
            state: handle.state(),
            restart_count: handle.restart_count(),
            input: handle.input().kind(),
            failure_reason: handle.failure_reason().map(str::to_string),
            pid: handle.pid(),
            last_output_progress_at: handle.last_output_progress_time(),
            cycle,
        }
    }
}

/// Engine status, rebuilt wholesale and shared as `Arc<EngineSnapshot>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub running: bool,
    pub cycle: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceState>,
    /// Destinations in configuration order.
    pub destinations: Vec<DestinationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub total_restarts: u64,
}

impl EngineSnapshot {
    /// Snapshot of an engine that is not running.
    pub fn idle() -> Self {
        Self {
            running: false,
            cycle: 0,
            source: None,
            destinations: Vec::new(),
            started_at: None,
            total_restarts: 0,
        }
    }

    pub fn destination(&self, id: &str) -> Option<&DestinationStatus> {
        self.destinations.iter().find(|d| d.id == id)
    }

    /// Number of destinations in `state`.
    pub fn count_in(&self, state: PublisherState) -> usize {
        self.destinations.iter().filter(|d| d.state == state).count()
    }
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}
