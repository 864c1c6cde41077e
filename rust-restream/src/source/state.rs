use chrono::{DateTime, Utc};
use serde::Serialize;

/// Whether the source channel is currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceStatus {
    Online,
    Offline,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "ONLINE"),
            Self::Offline => write!(f, "OFFLINE"),
        }
    }
}

/// Result of one resolver poll.
///
/// `ingest_url` is present exactly when the status is ONLINE; the fields are
/// private so the two constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceState {
    status: SourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    ingest_url: Option<String>,
    resolved_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl SourceState {
    pub fn online(ingest_url: impl Into<String>) -> Self {
        Self {
            status: SourceStatus::Online,
            ingest_url: Some(ingest_url.into()),
            resolved_at: Utc::now(),
            reason: None,
        }
    }

    pub fn offline(reason: impl Into<String>) -> Self {
        Self {
            status: SourceStatus::Offline,
            ingest_url: None,
            resolved_at: Utc::now(),
            reason: Some(reason.into()),
        }
    }

    pub fn status(&self) -> SourceStatus {
        self.status
    }

    pub fn is_online(&self) -> bool {
        self.status == SourceStatus::Online
    }

    pub fn ingest_url(&self) -> Option<&str> {
        self.ingest_url.as_deref()
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }

    /// Why the source is offline, if it is.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_has_url() {
        let state = SourceState::online("https://cdn.example/live.m3u8");
        assert!(state.is_online());
        assert_eq!(state.ingest_url(), Some("https://cdn.example/live.m3u8"));
        assert!(state.reason().is_none());
    }

    #[test]
    fn test_offline_has_no_url() {
        let state = SourceState::offline("channel is offline");
        assert_eq!(state.status(), SourceStatus::Offline);
        assert!(state.ingest_url().is_none());
        assert_eq!(state.reason(), Some("channel is offline"));
    }

    #[test]
    fn test_serialize_status() {
        let json = serde_json::to_value(SourceState::offline("x")).unwrap();
        assert_eq!(json["status"], "OFFLINE");
        assert!(json.get("ingest_url").is_none());
    }
}
