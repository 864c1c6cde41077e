use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::destination::Destination;
use crate::encoder::EncoderProcess;
use crate::events::{EngineEvent, EventBus};
use crate::placeholder::InputDescriptor;

/// Lifecycle state of one publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublisherState {
    Starting,
    Running,
    Stalled,
    Failed,
    Stopped,
}

impl PublisherState {
    /// Whether a process instance is expected to be alive in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stalled)
    }
}

impl std::fmt::Display for PublisherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stalled => "STALLED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Runtime state of one destination's publisher.
///
/// Owned by the destination's worker, the only writer of `state`.
pub struct PublisherHandle {
    pub(super) destination: Destination,
    pub(super) process: Option<Box<dyn EncoderProcess>>,
    pub(super) state: PublisherState,
    pub(super) restart_count: u64,
    pub(super) last_output_progress_at: Option<Instant>,
    pub(super) started_at: Option<Instant>,
    pub(super) stalled_since: Option<Instant>,
    pub(super) input: InputDescriptor,
    pub(super) failure_reason: Option<String>,
    pub(super) events: EventBus,
}

impl PublisherHandle {
    pub(super) fn new(destination: Destination, input: InputDescriptor, events: EventBus) -> Self {
        Self {
            destination,
            process: None,
            state: PublisherState::Stopped,
            restart_count: 0,
            last_output_progress_at: None,
            started_at: None,
            stalled_since: None,
            input,
            failure_reason: None,
            events,
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn destination_id(&self) -> &str {
        &self.destination.id
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    pub fn restart_count(&self) -> u64 {
        self.restart_count
    }

    pub fn input(&self) -> &InputDescriptor {
        &self.input
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn stalled_since(&self) -> Option<Instant> {
        self.stalled_since
    }

    pub fn last_output_progress_at(&self) -> Option<Instant> {
        self.last_output_progress_at
    }

    /// Wall-clock time of the last output progress.
    pub fn last_output_progress_time(&self) -> Option<DateTime<Utc>> {
        self.last_output_progress_at.map(to_wall_clock)
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid())
    }

    pub fn process(&self) -> Option<&dyn EncoderProcess> {
        self.process.as_deref()
    }

    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    pub(crate) fn set_last_output_progress_at(&mut self, at: Option<Instant>) {
        if at > self.last_output_progress_at {
            self.last_output_progress_at = at;
        }
    }

    /// Move to `to`, recording the reason of FAILED transitions. Emits an
    /// event for every real change.
    pub(crate) fn transition(&mut self, to: PublisherState, reason: Option<String>) {
        let from = self.state;
        if from == to {
            return;
        }

        match to {
            PublisherState::Stalled => self.stalled_since = Some(Instant::now()),
            _ => self.stalled_since = None,
        }
        if to == PublisherState::Failed {
            self.failure_reason = reason.clone();
        }
        self.state = to;

        self.events.publish(EngineEvent::PublisherTransition {
            destination_id: self.destination.id.clone(),
            from,
            to,
            reason,
            timestamp: Utc::now(),
        });
    }
}

impl std::fmt::Debug for PublisherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherHandle")
            .field("destination_id", &self.destination.id)
            .field("state", &self.state)
            .field("restart_count", &self.restart_count)
            .field("input", &self.input.kind())
            .field("pid", &self.pid())
            .finish()
    }
}

fn to_wall_clock(at: Instant) -> DateTime<Utc> {
    let elapsed: Duration = Instant::now().saturating_duration_since(at);
    let elapsed = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() - elapsed
}
