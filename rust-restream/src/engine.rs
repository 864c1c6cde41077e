//! Engine facade: the interface the control surface talks to.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{RestreamConfig, owner_marker};
use crate::destination::{redact_endpoint, validate_endpoint};
use crate::encoder::{EncodeJob, EncodeProfile, EncoderLauncher, ExitInfo};
use crate::events::{EngineEvent, EventBus};
use crate::placeholder::placeholder_source;
use crate::snapshot::EngineSnapshot;
use crate::source::SourceResolver;
use crate::supervisor::Supervisor;
use crate::{Error, Result};

/// Length of the synthetic publish used to test a destination.
pub const TEST_PUBLISH_DURATION: Duration = Duration::from_secs(5);

/// Slack on top of the test duration before a test publish is abandoned.
const TEST_PUBLISH_SLACK: Duration = Duration::from_secs(20);

/// Grace period for orphaned encoders found at startup.
const ORPHAN_STOP_GRACE: Duration = Duration::from_secs(5);

struct Running {
    config_tx: watch::Sender<Arc<RestreamConfig>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The stream redistribution engine.
pub struct RestreamEngine {
    launcher: Arc<dyn EncoderLauncher>,
    resolver: Option<Arc<dyn SourceResolver>>,
    events: EventBus,
    snapshot_tx: watch::Sender<Arc<EngineSnapshot>>,
    running: Mutex<Option<Running>>,
    /// Latest configuration handed to the engine.
    config: RwLock<Arc<RestreamConfig>>,
    sweep_orphans: bool,
    test_counter: AtomicU64,
}

impl RestreamEngine {
    /// Create an engine that resolves the source as configured.
    pub fn new(launcher: Arc<dyn EncoderLauncher>) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(EngineSnapshot::idle()));
        Self {
            launcher,
            resolver: None,
            events: EventBus::new(),
            snapshot_tx,
            running: Mutex::new(None),
            config: RwLock::new(Arc::new(RestreamConfig::default())),
            sweep_orphans: true,
            test_counter: AtomicU64::new(0),
        }
    }

    /// Use a fixed resolver instead of the configured one.
    pub fn with_resolver(mut self, resolver: Arc<dyn SourceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Enable or disable the orphan sweep performed by `start`.
    pub fn with_orphan_sweep(mut self, enabled: bool) -> Self {
        self.sweep_orphans = enabled;
        self
    }

    /// Start redistributing. Starting a running engine applies `config`
    /// instead, so nothing already running is spawned twice.
    pub async fn start(&self, config: RestreamConfig) -> Result<()> {
        config.validate_for_start()?;

        let config = Arc::new(config);
        *self.config.write() = config.clone();

        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref()
            && !current.task.is_finished()
        {
            info!("Engine already running, applying configuration");
            current.config_tx.send_replace(config);
            return Ok(());
        }

        if self.sweep_orphans {
            recover_orphans(&config.engine.instance_tag).await;
        }

        let destinations = config.desired_destinations().len();
        let (config_tx, config_rx) = watch::channel(config);
        let cancel = CancellationToken::new();

        let supervisor = Supervisor::new(
            self.launcher.clone(),
            self.resolver.clone(),
            self.events.clone(),
            config_rx,
            self.snapshot_tx.clone(),
            cancel.clone(),
        );
        self.events.publish(EngineEvent::EngineStarted {
            destinations,
            timestamp: Utc::now(),
        });
        let task = tokio::spawn(supervisor.run());

        *running = Some(Running {
            config_tx,
            cancel,
            task,
        });
        Ok(())
    }

    /// Stop every publisher. No encoder outlives this call.
    pub async fn stop(&self) -> Result<()> {
        // Held until the supervisor is gone so a concurrent start waits.
        let mut guard = self.running.lock().await;
        let Some(running) = guard.take() else {
            return Err(Error::NotRunning);
        };

        running.cancel.cancel();
        if let Err(e) = running.task.await {
            error!("Supervisor task failed: {}", e);
        }

        self.events.publish(EngineEvent::EngineStopped {
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Watch snapshot publications.
    pub fn watch_snapshots(&self) -> watch::Receiver<Arc<EngineSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Hand a new configuration to a running engine. It takes effect in an
    /// immediate reconciliation cycle. A stopped engine only validates it.
    pub async fn update_config(&self, config: RestreamConfig) -> Result<()> {
        config.validate()?;
        let config = Arc::new(config);
        *self.config.write() = config.clone();

        if let Some(running) = self.running.lock().await.as_ref() {
            running.config_tx.send_replace(config);
        }
        Ok(())
    }

    /// The latest configuration handed to the engine.
    pub fn config(&self) -> Arc<RestreamConfig> {
        self.config.read().clone()
    }

    /// Publish a short synthetic placeholder stream to `endpoint_url`,
    /// independently of any running publisher. Returns whether the encoder
    /// completed successfully.
    pub async fn test_destination(&self, endpoint_url: &str) -> bool {
        let config = self.config();
        match self.run_test_publish(endpoint_url, &config).await {
            Ok(exit) if exit.success() => {
                info!(endpoint = %redact_endpoint(endpoint_url), "Destination test succeeded");
                true
            }
            Ok(exit) => {
                warn!(endpoint = %redact_endpoint(endpoint_url), "Destination test failed: {}", exit);
                false
            }
            Err(e) => {
                warn!(endpoint = %redact_endpoint(endpoint_url), "Destination test failed: {}", e);
                false
            }
        }
    }

    async fn run_test_publish(&self, endpoint_url: &str, config: &RestreamConfig) -> Result<ExitInfo> {
        validate_endpoint(endpoint_url)?;

        let n = self.test_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let job = EncodeJob {
            destination_id: format!("test-{n}"),
            endpoint_url: endpoint_url.trim().to_string(),
            input: placeholder_source(&config.placeholder, &config.output),
            profile: Arc::new(EncodeProfile {
                encoder: config.encoder.clone(),
                output: config.output.clone(),
                owner_marker: config.test_publish_marker(),
            }),
            duration: Some(TEST_PUBLISH_DURATION),
        };

        let mut process = self.launcher.launch(&job).await?;
        match tokio::time::timeout(TEST_PUBLISH_DURATION + TEST_PUBLISH_SLACK, process.wait()).await {
            Ok(exit) => Ok(exit),
            Err(_) => {
                process.terminate(config.engine.stop_grace()).await;
                Err(Error::Other(format!(
                    "test publish did not finish within {}s",
                    (TEST_PUBLISH_DURATION + TEST_PUBLISH_SLACK).as_secs()
                )))
            }
        }
    }
}

/// Terminate encoders left behind by a previous run of this instance.
async fn recover_orphans(instance_tag: &str) {
    let marker = owner_marker(instance_tag);
    let sweep = tokio::task::spawn_blocking(move || {
        process_utils::terminate_tagged_processes(&marker, ORPHAN_STOP_GRACE)
    });

    match sweep.await {
        Ok(found) if !found.is_empty() => {
            warn!(count = found.len(), "Terminated orphaned encoders from a previous run");
        }
        Ok(_) => {}
        Err(e) => error!("Orphan sweep failed: {}", e),
    }
}
