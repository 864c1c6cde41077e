//! Configuration model.
//!
//! The engine reads an immutable snapshot of [`RestreamConfig`] once per
//! cycle. Every field has a default so a partial TOML file is valid.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::destination::Destination;
use crate::{Error, Result};

/// Complete configuration of one restream instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestreamConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
    #[serde(default)]
    pub engine: EngineTuning,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub placeholder: PlaceholderConfig,
    #[serde(default)]
    pub logging: LogSettings,
}

impl RestreamConfig {
    /// Structural validation. An empty or fully disabled destination list
    /// is valid here; see [`RestreamConfig::validate_for_start`].
    pub fn validate(&self) -> Result<()> {
        if self.source.channel.trim().is_empty() {
            return Err(Error::config("source.channel must not be empty"));
        }
        if self.source.lookup_timeout_ms == 0 {
            return Err(Error::config("source.lookup_timeout_ms must be positive"));
        }

        let mut ids = HashSet::new();
        for dest in &self.destinations {
            if dest.id.trim().is_empty() {
                return Err(Error::config("destination id must not be empty"));
            }
            if !ids.insert(dest.id.as_str()) {
                return Err(Error::config(format!(
                    "duplicate destination id '{}'",
                    dest.id
                )));
            }
            crate::destination::validate_endpoint(&dest.endpoint_url)
                .map_err(|e| Error::config(format!("destination '{}': {}", dest.id, e)))?;
        }

        let engine = &self.engine;
        if engine.poll_interval_ms == 0 {
            return Err(Error::config("engine.poll_interval_ms must be positive"));
        }
        if engine.stall_timeout_ms == 0 {
            return Err(Error::config("engine.stall_timeout_ms must be positive"));
        }
        if engine.hard_timeout_ms <= engine.stall_timeout_ms {
            return Err(Error::config(
                "engine.hard_timeout_ms must be longer than engine.stall_timeout_ms",
            ));
        }
        if engine.instance_tag.trim().is_empty() || engine.instance_tag.contains(char::is_whitespace)
        {
            return Err(Error::config(
                "engine.instance_tag must be a non-empty word without whitespace",
            ));
        }
        if engine.restart.max_backoff_ms < engine.restart.base_backoff_ms {
            return Err(Error::config(
                "engine.restart.max_backoff_ms must not be below base_backoff_ms",
            ));
        }

        let output = &self.output;
        if output.width == 0 || output.height == 0 || output.frame_rate == 0 {
            return Err(Error::config(
                "output width, height and frame_rate must be positive",
            ));
        }
        if output.width % 2 != 0 || output.height % 2 != 0 {
            return Err(Error::config("output width and height must be even"));
        }

        if self.encoder.binary_path.trim().is_empty() {
            return Err(Error::config("encoder.binary_path must not be empty"));
        }
        if self.placeholder.sample_rate == 0 {
            return Err(Error::config("placeholder.sample_rate must be positive"));
        }

        Ok(())
    }

    /// Validation applied when the engine starts: the configuration must be
    /// valid and at least one destination enabled.
    pub fn validate_for_start(&self) -> Result<()> {
        self.validate()?;
        if !self.destinations.iter().any(|d| d.enabled) {
            return Err(Error::config("no enabled destinations"));
        }
        Ok(())
    }

    /// The destinations the engine should publish to, in configuration order.
    pub fn desired_destinations(&self) -> Vec<Destination> {
        self.destinations
            .iter()
            .filter(|d| d.enabled)
            .map(DestinationConfig::to_destination)
            .collect()
    }

    /// Marker argument value that identifies encoders spawned by this instance.
    pub fn owner_marker(&self) -> String {
        owner_marker(&self.engine.instance_tag)
    }

    /// Marker for destination test publishes. Distinct from
    /// [`owner_marker`](Self::owner_marker) so a startup sweep leaves
    /// in-flight tests alone.
    pub fn test_publish_marker(&self) -> String {
        owner_marker(&format!("{}-test", self.engine.instance_tag))
    }
}

/// Marker value embedded in every encoder command line.
pub fn owner_marker(instance_tag: &str) -> String {
    format!("restream_owner={instance_tag}")
}

/// How the channel is turned into an ingest URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    /// Resolve through `streamlink --stream-url`.
    #[default]
    Streamlink,
    /// The channel already is an URL ffmpeg can read.
    Direct,
}

/// Source channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Channel URL or bare channel name.
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub resolver: ResolverKind,
    /// Quality passed to streamlink (e.g. "best", "720p").
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_streamlink_path")]
    pub streamlink_path: String,
    /// Additional streamlink arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

fn default_channel() -> String {
    "https://www.twitch.tv/randomtodaytv".to_string()
}

fn default_quality() -> String {
    "best".to_string()
}

fn default_streamlink_path() -> String {
    std::env::var("STREAMLINK_PATH").unwrap_or_else(|_| "streamlink".to_string())
}

fn default_lookup_timeout_ms() -> u64 {
    15_000
}

impl SourceConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            resolver: ResolverKind::default(),
            quality: default_quality(),
            streamlink_path: default_streamlink_path(),
            extra_args: Vec::new(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

/// One configured output endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    #[serde(alias = "name")]
    pub id: String,
    /// Full publish URL including the stream key.
    #[serde(alias = "url")]
    pub endpoint_url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl DestinationConfig {
    pub fn new(id: impl Into<String>, endpoint_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint_url: endpoint_url.into(),
            enabled: true,
        }
    }

    pub fn to_destination(&self) -> Destination {
        Destination {
            id: self.id.clone(),
            endpoint_url: self.endpoint_url.clone(),
            desired: self.enabled,
        }
    }
}

/// Supervisor and health tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineTuning {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a new encoder may run without output before it is failed.
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    /// Silence after which a running encoder is considered stalled.
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
    /// Silence (since the last progress) after which a stalled encoder fails.
    #[serde(default = "default_hard_timeout_ms")]
    pub hard_timeout_ms: u64,
    /// Grace period between a graceful stop request and a forced kill.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Identifies this instance's encoders for crash recovery.
    #[serde(default = "default_instance_tag")]
    pub instance_tag: String,
    #[serde(default)]
    pub restart: RestartBackoffConfig,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_startup_grace_ms() -> u64 {
    20_000
}

fn default_stall_timeout_ms() -> u64 {
    15_000
}

fn default_hard_timeout_ms() -> u64 {
    45_000
}

fn default_stop_grace_ms() -> u64 {
    5_000
}

fn default_instance_tag() -> String {
    "rust-restream".to_string()
}

impl EngineTuning {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.hard_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            startup_grace_ms: default_startup_grace_ms(),
            stall_timeout_ms: default_stall_timeout_ms(),
            hard_timeout_ms: default_hard_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            instance_tag: default_instance_tag(),
            restart: RestartBackoffConfig::default(),
        }
    }
}

/// Backoff applied to repeated restarts of one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartBackoffConfig {
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_failure_window_ms")]
    pub failure_window_ms: u64,
    /// Failures inside the window that restart immediately.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
}

fn default_base_backoff_ms() -> u64 {
    5_000
}

fn default_max_backoff_ms() -> u64 {
    120_000
}

fn default_failure_window_ms() -> u64 {
    300_000
}

fn default_failure_threshold() -> usize {
    3
}

impl Default for RestartBackoffConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            failure_window_ms: default_failure_window_ms(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// Target output video geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_frame_rate() -> u32 {
    30
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            frame_rate: default_frame_rate(),
        }
    }
}

/// ffmpeg transcode parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Path to ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub binary_path: String,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_tune", skip_serializing_if = "Option::is_none")]
    pub tune: Option<String>,
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: String,
    #[serde(default = "default_video_bitrate")]
    pub max_rate: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: String,
    #[serde(default = "default_gop")]
    pub gop: u32,
    #[serde(default = "default_keyint_min")]
    pub keyint_min: u32,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    #[serde(default = "default_audio_sample_rate")]
    pub audio_sample_rate: u32,
    /// Scaler used when upscaling (`-vf scale=...:flags=`).
    #[serde(default = "default_scale_flags")]
    pub scale_flags: String,
    /// Apply a light unsharp pass after scaling.
    #[serde(default = "default_true")]
    pub sharpen: bool,
    /// Additional input arguments, placed before every input.
    #[serde(default)]
    pub input_args: Vec<String>,
    /// Additional output arguments, placed before the output URL.
    #[serde(default)]
    pub output_args: Vec<String>,
    /// Output muxer.
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

fn default_ffmpeg_path() -> String {
    std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string())
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "veryfast".to_string()
}

fn default_tune() -> Option<String> {
    Some("zerolatency".to_string())
}

fn default_video_bitrate() -> String {
    "3500k".to_string()
}

fn default_buffer_size() -> String {
    "2M".to_string()
}

fn default_gop() -> u32 {
    50
}

fn default_keyint_min() -> u32 {
    25
}

fn default_pixel_format() -> String {
    "yuv420p".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "160k".to_string()
}

fn default_audio_sample_rate() -> u32 {
    44_100
}

fn default_scale_flags() -> String {
    "lanczos".to_string()
}

fn default_output_format() -> String {
    "flv".to_string()
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            binary_path: default_ffmpeg_path(),
            video_codec: default_video_codec(),
            preset: default_preset(),
            tune: default_tune(),
            video_bitrate: default_video_bitrate(),
            max_rate: default_video_bitrate(),
            buffer_size: default_buffer_size(),
            gop: default_gop(),
            keyint_min: default_keyint_min(),
            pixel_format: default_pixel_format(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            audio_sample_rate: default_audio_sample_rate(),
            scale_flags: default_scale_flags(),
            sharpen: true,
            input_args: Vec::new(),
            output_args: Vec::new(),
            output_format: default_output_format(),
        }
    }
}

/// Persisted logging preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Filter directive applied at startup. Empty keeps the built-in default.
    #[serde(default)]
    pub filter: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    7
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: String::new(),
            retention_days: default_retention_days(),
        }
    }
}

/// Synthetic content shown while the source is offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderConfig {
    /// Still image looped as video. A solid colour is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
    #[serde(default = "default_color")]
    pub color: String,
    /// Sine tone frequency. Silent audio when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone_hz: Option<u32>,
    #[serde(default = "default_audio_sample_rate")]
    pub sample_rate: u32,
}

fn default_color() -> String {
    "black".to_string()
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            image: None,
            color: default_color(),
            tone_hz: None,
            sample_rate: default_audio_sample_rate(),
        }
    }
}
