//! In-memory encoder and resolver used to drive the engine in tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use rust_restream::config::{
    DestinationConfig, EngineTuning, ResolverKind, RestartBackoffConfig, RestreamConfig,
};
use rust_restream::encoder::{
    EncodeJob, EncoderLauncher, EncoderProcess, ExitInfo, OutputProgress, ProgressSample,
    TerminationOutcome,
};
use rust_restream::placeholder::InputDescriptor;
use rust_restream::snapshot::EngineSnapshot;
use rust_restream::source::SourceResolver;
use rust_restream::{Error, RestreamEngine, Result};

/// One recorded launch.
#[derive(Debug, Clone)]
pub struct Launch {
    pub pid: u32,
    pub destination_id: String,
    pub endpoint_url: String,
    pub input: InputDescriptor,
    pub duration: Option<Duration>,
    pub owner_marker: String,
}

struct LiveProcess {
    destination_id: String,
    exit_tx: Arc<watch::Sender<Option<ExitInfo>>>,
}

#[derive(Default)]
struct LauncherState {
    next_pid: u32,
    live: HashMap<u32, LiveProcess>,
    launches: Vec<Launch>,
    failing_spawns: HashSet<String>,
    /// Destinations whose output froze, and since when.
    stalled: HashMap<String, Instant>,
    unreachable_endpoints: HashSet<String>,
}

impl LauncherState {
    fn finish(&mut self, pid: u32, exit: ExitInfo) -> bool {
        match self.live.remove(&pid) {
            Some(process) => {
                process.exit_tx.send_replace(Some(exit));
                true
            }
            None => false,
        }
    }
}

/// Launches fake encoders that report steady progress until told otherwise.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<LauncherState>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of processes that have not exited.
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn live_for(&self, destination_id: &str) -> usize {
        self.state
            .lock()
            .live
            .values()
            .filter(|p| p.destination_id == destination_id)
            .count()
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.state.lock().launches.clone()
    }

    pub fn launches_for(&self, destination_id: &str) -> Vec<Launch> {
        self.state
            .lock()
            .launches
            .iter()
            .filter(|l| l.destination_id == destination_id)
            .cloned()
            .collect()
    }

    /// Make every live process of `destination_id` exit with `code`.
    pub fn exit(&self, destination_id: &str, code: i32) -> usize {
        let mut state = self.state.lock();
        let pids: Vec<u32> = state
            .live
            .iter()
            .filter(|(_, p)| p.destination_id == destination_id)
            .map(|(pid, _)| *pid)
            .collect();
        for pid in &pids {
            state.finish(
                *pid,
                ExitInfo {
                    code: Some(code),
                    detail: "Broken pipe".to_string(),
                },
            );
        }
        pids.len()
    }

    /// Stop reporting output progress for `destination_id`.
    pub fn set_stalled(&self, destination_id: &str, stalled: bool) {
        let mut state = self.state.lock();
        if stalled {
            state
                .stalled
                .insert(destination_id.to_string(), Instant::now());
        } else {
            state.stalled.remove(destination_id);
        }
    }

    /// Make launches for `destination_id` fail to spawn.
    pub fn set_spawn_failing(&self, destination_id: &str, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing_spawns.insert(destination_id.to_string());
        } else {
            state.failing_spawns.remove(destination_id);
        }
    }

    /// Bounded jobs to this endpoint exit with an error.
    pub fn set_unreachable(&self, endpoint_url: &str) {
        self.state
            .lock()
            .unreachable_endpoints
            .insert(endpoint_url.to_string());
    }
}

#[async_trait]
impl EncoderLauncher for FakeLauncher {
    async fn launch(&self, job: &EncodeJob) -> Result<Box<dyn EncoderProcess>> {
        let mut state = self.state.lock();
        if state.failing_spawns.contains(&job.destination_id) {
            return Err(Error::spawn_failure(
                job.destination_id.clone(),
                "No such file or directory (os error 2)",
            ));
        }

        state.next_pid += 1;
        let pid = state.next_pid;
        let (exit_tx, exit_rx) = watch::channel(None);
        let exit_tx = Arc::new(exit_tx);

        state.launches.push(Launch {
            pid,
            destination_id: job.destination_id.clone(),
            endpoint_url: job.endpoint_url.clone(),
            input: job.input.clone(),
            duration: job.duration,
            owner_marker: job.profile.owner_marker.clone(),
        });
        state.live.insert(
            pid,
            LiveProcess {
                destination_id: job.destination_id.clone(),
                exit_tx: exit_tx.clone(),
            },
        );

        // Bounded jobs finish right away.
        if job.duration.is_some() {
            let exit = if state.unreachable_endpoints.contains(&job.endpoint_url) {
                ExitInfo {
                    code: Some(1),
                    detail: "Connection refused".to_string(),
                }
            } else {
                ExitInfo {
                    code: Some(0),
                    detail: "exit status: 0".to_string(),
                }
            };
            state.finish(pid, exit);
        }

        Ok(Box::new(FakeProcess {
            pid,
            destination_id: job.destination_id.clone(),
            started: Instant::now(),
            exit_rx,
            exit_tx,
            launcher: self.state.clone(),
        }))
    }
}

pub struct FakeProcess {
    pid: u32,
    destination_id: String,
    started: Instant,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    exit_tx: Arc<watch::Sender<Option<ExitInfo>>>,
    launcher: Arc<Mutex<LauncherState>>,
}

#[async_trait]
impl EncoderProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn progress(&self) -> ProgressSample {
        let frozen_at = self.launcher.lock().stalled.get(&self.destination_id).copied();
        let now = match frozen_at {
            // Never produced anything before the freeze.
            Some(since) if since <= self.started => return ProgressSample::default(),
            Some(since) => since,
            None => Instant::now(),
        };

        let elapsed = now - self.started;
        ProgressSample {
            latest: Some(OutputProgress {
                bytes_written: 1024 + elapsed.as_millis() as u64,
                frames: 1 + elapsed.as_millis() as u64 / 33,
                media_time_secs: elapsed.as_secs_f64(),
                bitrate_bytes_per_sec: 437_500,
                speed: 1.0,
            }),
            last_advanced_at: Some(now),
            updates: 1,
        }
    }

    fn exit_status(&self) -> Option<ExitInfo> {
        self.exit_rx.borrow().clone()
    }

    async fn wait(&mut self) -> ExitInfo {
        match self.exit_rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).clone().unwrap_or_else(killed),
            Err(_) => killed(),
        }
    }

    async fn terminate(&mut self, _grace: Duration) -> TerminationOutcome {
        if self.exit_rx.borrow().is_some() {
            return TerminationOutcome::AlreadyExited;
        }
        self.launcher.lock().live.remove(&self.pid);
        self.exit_tx.send_replace(Some(killed()));
        TerminationOutcome::Graceful
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.launcher.lock().live.remove(&self.pid);
    }
}

fn killed() -> ExitInfo {
    ExitInfo {
        code: Some(255),
        detail: "Exiting normally, received signal 15.".to_string(),
    }
}

/// Resolver whose availability the test flips.
#[derive(Clone)]
pub struct FakeResolver {
    url: Arc<Mutex<Option<String>>>,
}

impl FakeResolver {
    pub fn online(url: &str) -> Self {
        Self {
            url: Arc::new(Mutex::new(Some(url.to_string()))),
        }
    }

    pub fn offline() -> Self {
        Self {
            url: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_online(&self, url: &str) {
        *self.url.lock() = Some(url.to_string());
    }

    pub fn set_offline(&self) {
        *self.url.lock() = None;
    }
}

#[async_trait]
impl SourceResolver for FakeResolver {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn lookup(&self, _channel: &str) -> Result<String> {
        self.url
            .lock()
            .clone()
            .ok_or_else(|| Error::SourceUnavailable("channel is offline".to_string()))
    }
}

pub const POLL_INTERVAL_MS: u64 = 50;

/// Fast-cycling configuration with the given destination ids.
pub fn test_config(ids: &[&str]) -> RestreamConfig {
    RestreamConfig {
        destinations: ids
            .iter()
            .map(|id| DestinationConfig::new(*id, format!("rtmp://live.example.com/app/{id}-key")))
            .collect(),
        engine: EngineTuning {
            poll_interval_ms: POLL_INTERVAL_MS,
            startup_grace_ms: 2_000,
            stall_timeout_ms: 400,
            hard_timeout_ms: 800,
            stop_grace_ms: 200,
            instance_tag: "restream-test".to_string(),
            restart: RestartBackoffConfig {
                base_backoff_ms: 50,
                max_backoff_ms: 200,
                failure_window_ms: 10_000,
                failure_threshold: 3,
            },
        },
        source: rust_restream::config::SourceConfig {
            channel: "testchannel".to_string(),
            resolver: ResolverKind::Direct,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn test_engine(launcher: &FakeLauncher, resolver: &FakeResolver) -> RestreamEngine {
    RestreamEngine::new(Arc::new(launcher.clone()))
        .with_resolver(Arc::new(resolver.clone()))
        .with_orphan_sweep(false)
}

/// Wait until a published snapshot satisfies `predicate`.
pub async fn wait_for_snapshot<F>(engine: &RestreamEngine, predicate: F) -> Arc<EngineSnapshot>
where
    F: Fn(&EngineSnapshot) -> bool,
{
    let mut rx = engine.watch_snapshots();
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let snapshot = rx.borrow_and_update().clone();
                if predicate(&snapshot) {
                    return snapshot;
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    })
    .await;

    match result {
        Ok(snapshot) if predicate(&snapshot) => snapshot,
        _ => panic!("condition not reached, last snapshot: {:#?}", engine.snapshot()),
    }
}

/// Poll `condition` until it holds.
pub async fn eventually<F, Fut>(condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition().await {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
