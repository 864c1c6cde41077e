//! Outbound publish endpoints.

use serde::Serialize;
use url::Url;

use crate::{Error, Result};

/// One outbound endpoint, as seen by the engine for a single cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    pub id: String,
    /// Contains the stream key; never log it unredacted.
    #[serde(serialize_with = "serialize_redacted")]
    pub endpoint_url: String,
    pub desired: bool,
}

impl Destination {
    pub fn new(id: impl Into<String>, endpoint_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint_url: endpoint_url.into(),
            desired: true,
        }
    }

    pub fn redacted_endpoint(&self) -> String {
        redact_endpoint(&self.endpoint_url)
    }
}

fn serialize_redacted<S: serde::Serializer>(url: &str, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&redact_endpoint(url))
}

/// Check that an endpoint is an absolute URL with a host.
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(Error::validation("endpoint URL must not be empty"));
    }

    let url = Url::parse(endpoint)
        .map_err(|e| Error::validation(format!("invalid endpoint URL: {e}")))?;

    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::validation("endpoint URL must include a host"));
    }
    Ok(())
}

/// Mask the stream key (last path segment), any password and the query.
///
/// `rtmp://a.rtmp.youtube.com/live2/abcd-1234` becomes
/// `rtmp://a.rtmp.youtube.com/live2/ab****`.
pub fn redact_endpoint(endpoint: &str) -> String {
    let Ok(mut url) = Url::parse(endpoint) else {
        return mask(endpoint);
    };

    if url.password().is_some() {
        let _ = url.set_password(Some("****"));
    }
    if url.query().is_some() {
        url.set_query(Some("****"));
    }

    let path = url.path().to_string();
    if let Some((prefix, key)) = path.rsplit_once('/')
        && !key.is_empty()
    {
        url.set_path(&format!("{prefix}/{}", mask(key)));
    }

    url.to_string()
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(2).collect();
    format!("{visible}****")
}

/// Redact `endpoint` wherever it appears in free text, such as an encoder
/// error line. Secret parts echoed on their own are masked as well.
pub fn redact_endpoint_in(text: &str, endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return text.to_string();
    }

    let mut redacted = text.replace(endpoint, &redact_endpoint(endpoint));
    for secret in endpoint_secrets(endpoint) {
        redacted = redacted.replace(&secret, &mask(&secret));
    }
    redacted
}

/// Stream key, password and query of an endpoint, longest first.
fn endpoint_secrets(endpoint: &str) -> Vec<String> {
    let Ok(url) = Url::parse(endpoint) else {
        return vec![endpoint.to_string()];
    };

    let key = url
        .path()
        .rsplit_once('/')
        .map(|(_, key)| key.to_string())
        .unwrap_or_default();
    let mut secrets: Vec<String> = [
        Some(key),
        url.password().map(str::to_string),
        url.query().map(str::to_string),
    ]
    .into_iter()
    .flatten()
    // The mask shows two characters anyway.
    .filter(|s| s.chars().count() > 2)
    .collect();
    secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
    secrets
}
