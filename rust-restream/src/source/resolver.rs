use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{SourceState, StreamlinkResolver};
use crate::Result;
use crate::config::{ResolverKind, SourceConfig};

/// Resolves a channel identifier into a playable ingest URL.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Look up the current ingest URL for `channel`.
    ///
    /// Any error means the source is not playable right now.
    async fn lookup(&self, channel: &str) -> Result<String>;

    /// Bounded-time resolution that never fails.
    async fn resolve(&self, channel: &str, timeout: Duration) -> SourceState {
        match tokio::time::timeout(timeout, self.lookup(channel)).await {
            Ok(Ok(url)) => SourceState::online(url),
            Ok(Err(e)) => {
                debug!(resolver = self.name(), channel, error = %e, "Source lookup failed");
                SourceState::offline(e.to_string())
            }
            Err(_) => {
                debug!(resolver = self.name(), channel, "Source lookup timed out");
                SourceState::offline(format!("lookup timed out after {}ms", timeout.as_millis()))
            }
        }
    }
}

/// Treats the channel as an URL ffmpeg reads directly.
#[derive(Debug, Clone, Default)]
pub struct DirectResolver;

#[async_trait]
impl SourceResolver for DirectResolver {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn lookup(&self, channel: &str) -> Result<String> {
        let channel = channel.trim();
        if channel.is_empty() {
            return Err(crate::Error::SourceUnavailable(
                "no channel configured".to_string(),
            ));
        }
        Ok(channel.to_string())
    }
}

/// Build the resolver selected by the source configuration.
pub fn resolver_for(config: &SourceConfig) -> Arc<dyn SourceResolver> {
    match config.resolver {
        ResolverKind::Streamlink => Arc::new(StreamlinkResolver::from_config(config)),
        ResolverKind::Direct => Arc::new(DirectResolver),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    struct SlowResolver;

    #[async_trait]
    impl SourceResolver for SlowResolver {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn lookup(&self, _channel: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("never".to_string())
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl SourceResolver for FailingResolver {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn lookup(&self, _channel: &str) -> Result<String> {
            Err(Error::SourceUnavailable("channel is offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_direct_resolver_is_online() {
        let state = DirectResolver
            .resolve("rtmp://origin/live/main", Duration::from_secs(1))
            .await;
        assert!(state.is_online());
        assert_eq!(state.ingest_url(), Some("rtmp://origin/live/main"));
    }

    #[tokio::test]
    async fn test_direct_resolver_empty_channel_is_offline() {
        let state = DirectResolver.resolve("  ", Duration::from_secs(1)).await;
        assert!(!state.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_offline() {
        let state = SlowResolver
            .resolve("chan", Duration::from_millis(200))
            .await;
        assert!(!state.is_online());
        assert!(state.reason().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_error_maps_to_offline_with_reason() {
        let state = FailingResolver.resolve("chan", Duration::from_secs(1)).await;
        assert!(!state.is_online());
        assert!(state.reason().unwrap().contains("channel is offline"));
    }
}
