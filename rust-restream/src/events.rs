//! Engine events.
//!
//! Every state transition is written to the audit log target and broadcast
//! to subscribers (the control surface streams them to clients).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::placeholder::InputKind;
use crate::publisher::PublisherState;
use crate::source::SourceStatus;

/// Tracing target of the append-only audit trail.
pub const AUDIT_TARGET: &str = "rust_restream::audit";

/// Events emitted by the redistribution engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    EngineStarted {
        destinations: usize,
        timestamp: DateTime<Utc>,
    },
    EngineStopped {
        timestamp: DateTime<Utc>,
    },
    /// A publisher changed state.
    PublisherTransition {
        destination_id: String,
        from: PublisherState,
        to: PublisherState,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A failed publisher was relaunched.
    Restart {
        destination_id: String,
        restart_count: u64,
        timestamp: DateTime<Utc>,
    },
    /// The source flipped between online and offline.
    SourceChanged {
        from: Option<SourceStatus>,
        to: SourceStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A publisher was moved to another input kind.
    InputSwapped {
        destination_id: String,
        from: InputKind,
        to: InputKind,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Destination the event belongs to, if any.
    pub fn destination_id(&self) -> Option<&str> {
        match self {
            Self::PublisherTransition { destination_id, .. }
            | Self::Restart { destination_id, .. }
            | Self::InputSwapped { destination_id, .. } => Some(destination_id),
            _ => None,
        }
    }

    fn audit(&self) {
        match self {
            Self::EngineStarted {
                destinations,
                timestamp,
            } => info!(target: AUDIT_TARGET, event = "engine_started", destinations, %timestamp, "Engine started"),
            Self::EngineStopped { timestamp } => {
                info!(target: AUDIT_TARGET, event = "engine_stopped", %timestamp, "Engine stopped")
            }
            Self::PublisherTransition {
                destination_id,
                from,
                to,
                reason,
                timestamp,
            } => info!(
                target: AUDIT_TARGET,
                event = "publisher_transition",
                destination = %destination_id,
                from = %from,
                to = %to,
                reason = reason.as_deref().unwrap_or(""),
                %timestamp,
                "Publisher {} {} -> {}", destination_id, from, to
            ),
            Self::Restart {
                destination_id,
                restart_count,
                timestamp,
            } => info!(
                target: AUDIT_TARGET,
                event = "restart",
                destination = %destination_id,
                restart_count,
                %timestamp,
                "Restarting publisher {}", destination_id
            ),
            Self::SourceChanged {
                from,
                to,
                reason,
                timestamp,
            } => info!(
                target: AUDIT_TARGET,
                event = "source_changed",
                from = from.map(|s| s.to_string()).unwrap_or_else(|| "NONE".to_string()),
                to = %to,
                reason = reason.as_deref().unwrap_or(""),
                %timestamp,
                "Source is {}", to
            ),
            Self::InputSwapped {
                destination_id,
                from,
                to,
                timestamp,
            } => info!(
                target: AUDIT_TARGET,
                event = "input_swapped",
                destination = %destination_id,
                from = %from,
                to = %to,
                %timestamp,
                "Publisher {} input {} -> {}", destination_id, from, to
            ),
        }
    }
}

/// Broadcasts engine events to any number of subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new bus with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Audit-log the event and broadcast it. Having no subscribers is fine.
    pub fn publish(&self, event: EngineEvent) {
        event.audit();
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
