//! Per-destination worker.
//!
//! Each destination runs in its own task with its own publisher, health
//! monitor and restart backoff. The worker processes cycle decisions one at
//! a time, which serializes every restart of its destination.

use std::sync::Arc;

use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::CycleDecision;
use super::restart_backoff::{BackoffPolicy, RestartBackoff};
use crate::destination::Destination;
use crate::encoder::EncoderLauncher;
use crate::events::EventBus;
use crate::health::{HealthConfig, HealthMonitor};
use crate::publisher::{Publisher, PublisherHandle, PublisherSettings, PublisherState};
use crate::snapshot::DestinationStatus;

/// Decisions queued per worker before the supervisor starts skipping.
pub(super) const MAILBOX_CAPACITY: usize = 4;

/// The supervisor's side of a worker.
pub(super) struct WorkerEntry {
    pub destination: Destination,
    pub mailbox: mpsc::Sender<Arc<CycleDecision>>,
    pub status: watch::Receiver<DestinationStatus>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

pub(super) struct WorkerContext {
    pub launcher: Arc<dyn EncoderLauncher>,
    pub events: EventBus,
    pub notify: Arc<Notify>,
}

/// Spawn a worker that immediately starts publishing `destination`.
pub(super) fn spawn_worker(
    destination: Destination,
    decision: Arc<CycleDecision>,
    ctx: &WorkerContext,
    cancel: CancellationToken,
) -> WorkerEntry {
    let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);
    let (status_tx, status_rx) = watch::channel(initial_status(&destination, &decision));

    let publisher = Publisher::new(
        ctx.launcher.clone(),
        ctx.events.clone(),
        publisher_settings(&decision),
    );

    let worker = DestinationWorker {
        destination: destination.clone(),
        publisher,
        monitor: HealthMonitor::new(HealthConfig::from(&decision.config.engine)),
        backoff: RestartBackoff::new(BackoffPolicy::from(&decision.config.engine.restart)),
        failure_recorded: false,
        handle: None,
        cycle: decision.cycle,
        status_tx,
        notify: ctx.notify.clone(),
        mailbox: mailbox_rx,
        cancel: cancel.clone(),
    };

    let task = tokio::spawn(worker.run(decision));

    WorkerEntry {
        destination,
        mailbox: mailbox_tx,
        status: status_rx,
        cancel,
        task,
    }
}

fn publisher_settings(decision: &CycleDecision) -> PublisherSettings {
    PublisherSettings {
        profile: decision.profile.clone(),
        stop_grace: decision.config.engine.stop_grace(),
    }
}

fn initial_status(destination: &Destination, decision: &CycleDecision) -> DestinationStatus {
    DestinationStatus {
        id: destination.id.clone(),
        endpoint: destination.redacted_endpoint(),
        state: PublisherState::Stopped,
        restart_count: 0,
        input: decision.input.kind(),
        failure_reason: None,
        pid: None,
        last_output_progress_at: None,
        cycle: decision.cycle,
    }
}

struct DestinationWorker {
    destination: Destination,
    publisher: Publisher,
    monitor: HealthMonitor,
    backoff: RestartBackoff,
    /// Whether the current FAILED state was already counted by the backoff.
    failure_recorded: bool,
    handle: Option<PublisherHandle>,
    cycle: u64,
    status_tx: watch::Sender<DestinationStatus>,
    notify: Arc<Notify>,
    mailbox: mpsc::Receiver<Arc<CycleDecision>>,
    cancel: CancellationToken,
}

impl DestinationWorker {
    async fn run(mut self, initial: Arc<CycleDecision>) {
        let handle = self
            .publisher
            .start(self.destination.clone(), initial.input.clone())
            .await;
        self.handle = Some(handle);
        self.track_failure(Instant::now());
        self.report();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                decision = self.mailbox.recv() => match decision {
                    Some(decision) => {
                        self.on_cycle(&decision).await;
                        self.report();
                    }
                    None => break,
                },
            }
        }

        if let Some(handle) = self.handle.as_mut() {
            self.publisher.stop(handle).await;
        }
        self.report();
        debug!(destination = %self.destination.id, "Worker finished");
    }

    async fn on_cycle(&mut self, decision: &CycleDecision) {
        self.cycle = decision.cycle;
        self.publisher.set_settings(publisher_settings(decision));
        self.monitor
            .set_config(HealthConfig::from(&decision.config.engine));
        self.backoff
            .set_policy(BackoffPolicy::from(&decision.config.engine.restart));

        let Some(handle) = self.handle.as_mut() else {
            return;
        };

        // Input kind flipped: move to the new input, once.
        if handle.input().kind() != decision.input.kind() {
            info!(
                destination = %handle.destination_id(),
                from = %handle.input().kind(),
                to = %decision.input.kind(),
                "Swapping input"
            );
            self.publisher
                .swap_input(handle, decision.input.clone())
                .await;
            self.track_failure(Instant::now());
            return;
        }

        let now = Instant::now();
        let (observation, verdict) = self.monitor.sample(handle, now);
        handle.set_last_output_progress_at(observation.last_progress_at);

        if verdict.state != handle.state() {
            if verdict.state == PublisherState::Failed {
                warn!(
                    destination = %handle.destination_id(),
                    reason = verdict.reason.as_deref().unwrap_or("unknown"),
                    "Publisher failed"
                );
            }
            handle.transition(verdict.state, verdict.reason);
        }
        self.track_failure(now);

        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        if handle.state() == PublisherState::Failed && self.backoff.ready(now) {
            self.publisher
                .restart(handle, decision.input.clone())
                .await;
            self.track_failure(Instant::now());
        }
    }

    /// Count each entry into FAILED once.
    fn track_failure(&mut self, now: Instant) {
        let failed = self
            .handle
            .as_ref()
            .is_some_and(|h| h.state() == PublisherState::Failed);

        if failed && !self.failure_recorded {
            self.backoff.record_failure(&self.destination.id, now);
            self.failure_recorded = true;
        } else if !failed {
            self.failure_recorded = false;
        }
    }

    fn report(&self) {
        if let Some(handle) = self.handle.as_ref() {
            self.status_tx
                .send_replace(DestinationStatus::from_handle(handle, self.cycle));
            self.notify.notify_one();
        }
    }
}
