//! Redistribution supervisor: the control loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Notify, watch};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::CycleDecision;
use super::worker::{WorkerContext, WorkerEntry, spawn_worker};
use crate::config::RestreamConfig;
use crate::destination::Destination;
use crate::encoder::{EncodeProfile, EncoderLauncher};
use crate::events::{EngineEvent, EventBus};
use crate::placeholder::{InputDescriptor, placeholder_source};
use crate::publisher::PublisherState;
use crate::snapshot::{DestinationStatus, EngineSnapshot};
use crate::source::{SourceResolver, SourceState, resolver_for};

/// Extra time granted to a stopping worker on top of the stop grace.
const WORKER_STOP_MARGIN: Duration = Duration::from_secs(5);

/// Top-level control loop of a running engine.
pub struct Supervisor {
    resolver: Option<Arc<dyn SourceResolver>>,
    config_rx: watch::Receiver<Arc<RestreamConfig>>,
    snapshot_tx: watch::Sender<Arc<EngineSnapshot>>,
    ctx: WorkerContext,
    workers: HashMap<String, WorkerEntry>,
    cycle: u64,
    source: Option<Arc<SourceState>>,
    profile: Option<Arc<EncodeProfile>>,
    /// Restarts of workers that no longer exist.
    retired_restarts: u64,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Create a supervisor. With no `resolver`, one is built from the
    /// source configuration every cycle.
    pub fn new(
        launcher: Arc<dyn EncoderLauncher>,
        resolver: Option<Arc<dyn SourceResolver>>,
        events: EventBus,
        config_rx: watch::Receiver<Arc<RestreamConfig>>,
        snapshot_tx: watch::Sender<Arc<EngineSnapshot>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            config_rx,
            snapshot_tx,
            ctx: WorkerContext {
                launcher,
                events,
                notify: Arc::new(Notify::new()),
            },
            workers: HashMap::new(),
            cycle: 0,
            source: None,
            profile: None,
            retired_restarts: 0,
            started_at: Utc::now(),
            cancel,
        }
    }

    /// Run until cancelled, then stop every worker.
    pub async fn run(mut self) {
        let poll_interval = self.config_rx.borrow().engine.poll_interval();
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let notify = self.ctx.notify.clone();

        info!(interval = ?poll_interval, "Supervisor started");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                changed = self.config_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let poll_interval = self.config_rx.borrow_and_update().engine.poll_interval();
                    if poll_interval != interval.period() {
                        interval = tokio::time::interval(poll_interval);
                        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    }
                    debug!("Configuration changed, reconciling now");
                    self.run_cycle().await;
                    interval.reset();
                }
                _ = interval.tick() => self.run_cycle().await,
                _ = notify.notified() => self.publish_snapshot(),
            }
        }

        self.shutdown().await;
        info!("Supervisor stopped");
    }

    /// One poll-decide-reconcile-publish cycle.
    pub async fn run_cycle(&mut self) {
        self.cycle += 1;
        let config = self.config_rx.borrow().clone();

        // 1. Poll the resolver
        let resolver = self
            .resolver
            .clone()
            .unwrap_or_else(|| resolver_for(&config.source));
        let source = tokio::select! {
            state = resolver.resolve(&config.source.channel, config.source.lookup_timeout()) => state,
            _ = self.cancel.cancelled() => return,
        };
        let source = Arc::new(source);
        self.note_source(&source);

        let placeholder = placeholder_source(&config.placeholder, &config.output);
        let decision = Arc::new(CycleDecision {
            cycle: self.cycle,
            input: InputDescriptor::for_source(&source, &placeholder),
            source,
            profile: self.profile_for(&config),
            config: config.clone(),
        });

        // 2. Reconcile: stop removed (or re-pointed) destinations first
        let desired = config.desired_destinations();
        let desired_by_id: HashMap<&str, &Destination> =
            desired.iter().map(|d| (d.id.as_str(), d)).collect();

        let removed: Vec<String> = self
            .workers
            .iter()
            .filter(|(id, entry)| match desired_by_id.get(id.as_str()) {
                Some(dest) => dest.endpoint_url != entry.destination.endpoint_url,
                None => true,
            })
            .map(|(id, _)| id.clone())
            .collect();
        self.stop_workers(&removed, config.engine.stop_grace()).await;

        // 3. Deliver the decision to every remaining worker
        let mut dead = Vec::new();
        for (id, entry) in &self.workers {
            match entry.mailbox.try_send(decision.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(destination = %id, cycle = self.cycle, "Worker busy, skipping cycle");
                }
                Err(TrySendError::Closed(_)) => {
                    error!(destination = %id, "Worker exited unexpectedly");
                    dead.push(id.clone());
                }
            }
        }
        self.stop_workers(&dead, config.engine.stop_grace()).await;

        // 4. Start workers for new destinations
        for dest in desired {
            if !self.workers.contains_key(&dest.id) {
                info!(destination = %dest.id, endpoint = %dest.redacted_endpoint(), "Adding destination");
                let entry = spawn_worker(dest.clone(), decision.clone(), &self.ctx, self.cancel.child_token());
                self.workers.insert(dest.id, entry);
            }
        }

        // 5. Publish
        self.publish_snapshot();
    }

    fn note_source(&mut self, source: &Arc<SourceState>) {
        let previous = self.source.as_ref().map(|s| s.status());
        if previous != Some(source.status()) {
            self.ctx.events.publish(EngineEvent::SourceChanged {
                from: previous,
                to: source.status(),
                reason: source.reason().map(str::to_string),
                timestamp: Utc::now(),
            });
        }
        self.source = Some(source.clone());
    }

    fn profile_for(&mut self, config: &RestreamConfig) -> Arc<EncodeProfile> {
        let profile = EncodeProfile {
            encoder: config.encoder.clone(),
            output: config.output.clone(),
            owner_marker: config.owner_marker(),
        };
        match &self.profile {
            Some(current) if **current == profile => current.clone(),
            _ => {
                let profile = Arc::new(profile);
                self.profile = Some(profile.clone());
                profile
            }
        }
    }

    /// Stop workers and wait for them to finish, concurrently. Workers that
    /// outlive the grace period are aborted; their encoders die with them.
    ///
    /// Returns the final status of each stopped worker.
    async fn stop_workers(&mut self, ids: &[String], grace: Duration) -> Vec<DestinationStatus> {
        let entries: Vec<WorkerEntry> = ids.iter().filter_map(|id| self.workers.remove(id)).collect();
        if entries.is_empty() {
            return Vec::new();
        }

        for entry in &entries {
            info!(destination = %entry.destination.id, "Stopping destination");
            entry.cancel.cancel();
        }

        let deadline = grace + WORKER_STOP_MARGIN;
        let statuses = join_all(entries.into_iter().map(|mut entry| async move {
            let aborted = tokio::time::timeout(deadline, &mut entry.task).await.is_err();
            if aborted {
                warn!(destination = %entry.destination.id, "Worker did not stop in time, aborting");
                entry.task.abort();
                let _ = (&mut entry.task).await;
            }

            let mut status = entry.status.borrow().clone();
            if aborted {
                status.state = PublisherState::Stopped;
                status.pid = None;
            }
            status
        }))
        .await;

        self.retired_restarts += statuses.iter().map(|s| s.restart_count).sum::<u64>();
        statuses
    }

    fn build_snapshot(&self, running: bool) -> EngineSnapshot {
        let config = self.config_rx.borrow().clone();

        let mut destinations: Vec<DestinationStatus> = Vec::with_capacity(self.workers.len());
        for dest in &config.destinations {
            if let Some(entry) = self.workers.get(&dest.id) {
                destinations.push(entry.status.borrow().clone());
            }
        }
        // Workers whose destination left the configuration but not yet reconciled.
        for (id, entry) in &self.workers {
            if !config.destinations.iter().any(|d| &d.id == id) {
                destinations.push(entry.status.borrow().clone());
            }
        }

        let total_restarts = self.retired_restarts
            + destinations.iter().map(|d| d.restart_count).sum::<u64>();

        EngineSnapshot {
            running,
            cycle: self.cycle,
            source: self.source.as_deref().cloned(),
            destinations,
            started_at: Some(self.started_at),
            total_restarts,
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(Arc::new(self.build_snapshot(true)));
    }

    async fn shutdown(&mut self) {
        let config = self.config_rx.borrow().clone();
        let ids: Vec<String> = self.workers.keys().cloned().collect();

        let mut statuses = self.stop_workers(&ids, config.engine.stop_grace()).await;
        statuses.sort_by_key(|status| {
            config
                .destinations
                .iter()
                .position(|d| d.id == status.id)
                .unwrap_or(usize::MAX)
        });
        debug!(workers = statuses.len(), "All workers stopped");

        let mut snapshot = self.build_snapshot(false);
        snapshot.destinations = statuses;
        snapshot.total_restarts = self.retired_restarts;
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }
}
