//! Streamlink-backed source resolution.

use std::process::Stdio;

use async_trait::async_trait;
use tracing::trace;

use super::SourceResolver;
use crate::config::SourceConfig;
use crate::{Error, Result};

const DEFAULT_STREAMLINK_PATH: &str = "streamlink";
const DEFAULT_QUALITY: &str = "best";
const TWITCH_BASE_URL: &str = "https://www.twitch.tv/";

/// Resolves channels with `streamlink --stream-url`.
#[derive(Debug, Clone)]
pub struct StreamlinkResolver {
    binary_path: String,
    quality: String,
    extra_args: Vec<String>,
}

impl StreamlinkResolver {
    pub fn new(binary_path: impl Into<String>, quality: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            quality: quality.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        let quality = if config.quality.trim().is_empty() {
            DEFAULT_QUALITY.to_string()
        } else {
            config.quality.clone()
        };
        let binary_path = if config.streamlink_path.trim().is_empty() {
            DEFAULT_STREAMLINK_PATH.to_string()
        } else {
            config.streamlink_path.clone()
        };

        Self {
            binary_path,
            quality,
            extra_args: config.extra_args.clone(),
        }
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn build_args(&self, channel: &str) -> Vec<String> {
        let mut args = vec![
            "--stream-url".to_string(),
            channel_url(channel),
            self.quality.clone(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl Default for StreamlinkResolver {
    fn default() -> Self {
        let binary_path = std::env::var("STREAMLINK_PATH")
            .unwrap_or_else(|_| DEFAULT_STREAMLINK_PATH.to_string());
        Self::new(binary_path, DEFAULT_QUALITY)
    }
}

#[async_trait]
impl SourceResolver for StreamlinkResolver {
    fn name(&self) -> &'static str {
        "streamlink"
    }

    async fn lookup(&self, channel: &str) -> Result<String> {
        if channel.trim().is_empty() {
            return Err(Error::SourceUnavailable("no channel configured".to_string()));
        }

        let args = self.build_args(channel);
        trace!(args = ?args, "Running streamlink");

        // Dropping the future on timeout drops the child, which kills it.
        let mut cmd = process_utils::tokio_command(&self.binary_path);
        cmd.args(&args);

        let out = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                Error::SourceUnavailable(format!(
                    "failed to run {}: {}",
                    self.binary_path, e
                ))
            })?;

        if !out.status.success() {
            // streamlink reports errors on stdout when it fails early.
            let mut message = String::from_utf8_lossy(&out.stderr).trim().to_string();
            if message.is_empty() {
                message = String::from_utf8_lossy(&out.stdout).trim().to_string();
            }
            return Err(map_streamlink_error(&message));
        }

        let url = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if url.is_empty() {
            return Err(Error::SourceUnavailable(
                "streamlink returned an empty URL".to_string(),
            ));
        }
        Ok(url)
    }
}

/// Expand a bare channel name into a Twitch channel URL.
pub(crate) fn channel_url(channel: &str) -> String {
    let channel = channel.trim();
    if channel.contains("://") {
        channel.to_string()
    } else {
        format!("{TWITCH_BASE_URL}{}", channel.trim_start_matches('/'))
    }
}

fn map_streamlink_error(msg: &str) -> Error {
    let lower = msg.to_lowercase();
    if lower.contains("no plugin can handle url") {
        return Error::SourceUnavailable("channel not found: no plugin can handle URL".to_string());
    }
    if lower.contains("no playable streams") || lower.contains("no streams found") {
        return Error::SourceUnavailable("channel is offline".to_string());
    }
    if msg.is_empty() {
        return Error::SourceUnavailable("streamlink exited without output".to_string());
    }
    Error::SourceUnavailable(msg.lines().last().unwrap_or(msg).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_channel_url() {
        assert_eq!(channel_url("somechannel"), "https://www.twitch.tv/somechannel");
        assert_eq!(
            channel_url(" https://www.twitch.tv/other "),
            "https://www.twitch.tv/other"
        );
        assert_eq!(channel_url("rtmp://host/app"), "rtmp://host/app");
    }

    #[test]
    fn test_build_args() {
        let resolver = StreamlinkResolver::new("streamlink", "720p")
            .with_extra_args(vec!["--twitch-disable-ads".to_string()]);
        assert_eq!(
            resolver.build_args("chan"),
            vec![
                "--stream-url",
                "https://www.twitch.tv/chan",
                "720p",
                "--twitch-disable-ads"
            ]
        );
    }

    #[test]
    fn test_map_streamlink_error() {
        let err = map_streamlink_error("error: No playable streams found on this URL: x");
        assert!(err.to_string().contains("channel is offline"));

        let err = map_streamlink_error("error: No plugin can handle URL: foo");
        assert!(err.to_string().contains("channel not found"));

        let err = map_streamlink_error("[cli][info] Found matching plugin\nerror: boom");
        assert!(err.to_string().ends_with("error: boom"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_offline() {
        let resolver = StreamlinkResolver::new("/nonexistent/streamlink-binary", "best");
        let state = resolver.resolve("chan", Duration::from_secs(5)).await;
        assert!(!state.is_online());
        assert!(state.reason().unwrap().contains("failed to run"));
    }
}
