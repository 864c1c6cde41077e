//! Encoder abstraction.
//!
//! The engine never touches `tokio::process` directly: it launches encoders
//! through [`EncoderLauncher`] and drives them through [`EncoderProcess`],
//! which keeps the supervisor testable with in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;

use crate::Result;
use crate::config::{EncoderConfig, OutputConfig};
use crate::placeholder::InputDescriptor;

/// Counters parsed from one encoder stats line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OutputProgress {
    pub bytes_written: u64,
    pub frames: u64,
    pub media_time_secs: f64,
    pub bitrate_bytes_per_sec: u64,
    pub speed: f64,
}

impl OutputProgress {
    /// Whether any output counter moved forward compared to `previous`.
    pub fn advanced_since(&self, previous: &OutputProgress) -> bool {
        self.bytes_written > previous.bytes_written
            || self.frames > previous.frames
            || self.media_time_secs > previous.media_time_secs
    }
}

/// Latest progress observed for a process.
#[derive(Debug, Clone, Default)]
pub struct ProgressSample {
    pub latest: Option<OutputProgress>,
    /// When a counter last moved forward.
    pub last_advanced_at: Option<Instant>,
    /// Number of stats lines seen.
    pub updates: u64,
}

impl ProgressSample {
    /// Record a freshly parsed stats line.
    pub fn record(&mut self, progress: OutputProgress, now: Instant) {
        let advanced = match &self.latest {
            Some(previous) => progress.advanced_since(previous),
            None => progress.advanced_since(&OutputProgress::default()),
        };
        if advanced {
            self.last_advanced_at = Some(now);
        }
        self.latest = Some(progress);
        self.updates += 1;
    }
}

/// How an encoder process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Last error line written by the encoder, or the exit status.
    pub detail: String,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exited with code {code}: {}", self.detail),
            None => write!(f, "terminated by signal: {}", self.detail),
        }
    }
}

/// Result of asking a process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The process had already exited.
    AlreadyExited,
    /// The process quit within the grace period.
    Graceful,
    /// The process was killed after the grace period.
    Forced,
}

/// Transcode parameters shared by every job built from one configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeProfile {
    pub encoder: EncoderConfig,
    pub output: OutputConfig,
    /// Marker argument value identifying this instance's encoders.
    pub owner_marker: String,
}

/// One encoder launch request.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub destination_id: String,
    pub endpoint_url: String,
    pub input: InputDescriptor,
    pub profile: Arc<EncodeProfile>,
    /// Stop after this much output; runs until stopped when unset.
    pub duration: Option<Duration>,
}

/// A running encoder, exclusively owned by one publisher handle.
#[async_trait]
pub trait EncoderProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Latest progress. Never blocks.
    fn progress(&self) -> ProgressSample;

    /// Exit information once the process has exited. Never blocks.
    fn exit_status(&self) -> Option<ExitInfo>;

    /// Wait for the process to exit on its own.
    async fn wait(&mut self) -> ExitInfo;

    /// Stop gracefully, killing the process if it outlives `grace`. The
    /// process is reaped when this returns.
    async fn terminate(&mut self, grace: Duration) -> TerminationOutcome;
}

/// Spawns encoder processes.
#[async_trait]
pub trait EncoderLauncher: Send + Sync {
    async fn launch(&self, job: &EncodeJob) -> Result<Box<dyn EncoderProcess>>;
}
