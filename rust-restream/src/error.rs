//! Application-wide error types.

use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The source could not be resolved to a playable URL. Expected while the
    /// channel is offline; callers turn it into an OFFLINE source state.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Failed to spawn encoder for destination {destination}: {reason}")]
    SpawnFailure { destination: String, reason: String },

    #[error("No output progress from destination {destination} for {elapsed:?}")]
    StallTimeout {
        destination: String,
        elapsed: Duration,
    },

    #[error("Encoder for destination {destination} did not exit within {grace:?}")]
    TerminationTimeout {
        destination: String,
        grace: Duration,
    },

    #[error("Engine is not running")]
    NotRunning,

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn spawn_failure(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailure {
            destination: destination.into(),
            reason: reason.into(),
        }
    }
}
