use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{PublisherHandle, PublisherState};
use crate::destination::Destination;
use crate::encoder::{EncodeJob, EncodeProfile, EncoderLauncher, TerminationOutcome};
use crate::events::{EngineEvent, EventBus};
use crate::placeholder::InputDescriptor;

/// Parameters applied to every launch, refreshed from configuration.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub profile: Arc<EncodeProfile>,
    pub stop_grace: Duration,
}

/// Starts, stops and relaunches the encoder of one destination.
#[derive(Clone)]
pub struct Publisher {
    launcher: Arc<dyn EncoderLauncher>,
    events: EventBus,
    settings: PublisherSettings,
}

impl Publisher {
    pub fn new(launcher: Arc<dyn EncoderLauncher>, events: EventBus, settings: PublisherSettings) -> Self {
        Self {
            launcher,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> &PublisherSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: PublisherSettings) {
        self.settings = settings;
    }

    /// Launch a publisher for `destination` fed from `input`.
    ///
    /// Never fails: a spawn failure leaves the handle FAILED with a reason.
    pub async fn start(&self, destination: Destination, input: InputDescriptor) -> PublisherHandle {
        let mut handle = PublisherHandle::new(destination, input, self.events.clone());
        self.launch(&mut handle).await;
        handle
    }

    /// Stop the process (gracefully, then by force) and leave the handle
    /// STOPPED with the process reaped.
    pub async fn stop(&self, handle: &mut PublisherHandle) {
        self.terminate(handle).await;
        handle.transition(PublisherState::Stopped, None);
    }

    /// Feed the publisher from another input. ffmpeg cannot switch inputs
    /// in place, so this is a stop followed by a start.
    pub async fn swap_input(&self, handle: &mut PublisherHandle, input: InputDescriptor) {
        let from = handle.input.kind();
        let to = input.kind();

        self.terminate(handle).await;
        handle.input = input;

        if from != to {
            self.events.publish(EngineEvent::InputSwapped {
                destination_id: handle.destination.id.clone(),
                from,
                to,
                timestamp: Utc::now(),
            });
        }

        self.launch(handle).await;
    }

    /// Relaunch the publisher with `input`, terminating any prior process
    /// first.
    pub async fn restart(&self, handle: &mut PublisherHandle, input: InputDescriptor) {
        self.terminate(handle).await;
        handle.input = input;
        self.launch(handle).await;
    }

    /// Terminate and reap the current process, if any.
    async fn terminate(&self, handle: &mut PublisherHandle) {
        let Some(mut process) = handle.process.take() else {
            return;
        };

        let outcome = process.terminate(self.settings.stop_grace).await;
        match outcome {
            TerminationOutcome::Forced => warn!(
                destination = %handle.destination.id,
                grace = ?self.settings.stop_grace,
                "Encoder killed after grace period"
            ),
            _ => debug!(destination = %handle.destination.id, outcome = ?outcome, "Encoder stopped"),
        }
    }

    /// The single launch path. Counts a restart exactly when the prior
    /// state was FAILED.
    async fn launch(&self, handle: &mut PublisherHandle) {
        debug_assert!(handle.process.is_none());

        if handle.state == PublisherState::Failed {
            handle.restart_count += 1;
            self.events.publish(EngineEvent::Restart {
                destination_id: handle.destination.id.clone(),
                restart_count: handle.restart_count,
                timestamp: Utc::now(),
            });
        }

        handle.transition(PublisherState::Starting, None);
        handle.started_at = Some(Instant::now());
        handle.last_output_progress_at = None;

        let job = EncodeJob {
            destination_id: handle.destination.id.clone(),
            endpoint_url: handle.destination.endpoint_url.clone(),
            input: handle.input.clone(),
            profile: self.settings.profile.clone(),
            duration: None,
        };

        match self.launcher.launch(&job).await {
            Ok(process) => handle.process = Some(process),
            Err(e) => {
                warn!(destination = %handle.destination.id, error = %e, "Failed to start encoder");
                handle.transition(PublisherState::Failed, Some(e.to_string()));
            }
        }
    }
}
