//! TOML-backed configuration store.
//!
//! The store is the only writer of the configuration file. Every mutation
//! validates the edited copy, persists it atomically (temp file + rename)
//! and only then replaces the in-memory snapshot.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{DestinationConfig, RestreamConfig};
use crate::destination::{redact_endpoint, validate_endpoint};
use crate::{Error, Result};

pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<RestreamConfig>,
    /// Serializes read-modify-write cycles so concurrent edits are not lost.
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Load the configuration file, creating it with defaults when missing.
    pub async fn load_or_init(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let config = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let config: RestreamConfig = toml::from_str(&contents)?;
                config.validate()?;
                info!(path = %path.display(), destinations = config.destinations.len(), "Configuration loaded");
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = RestreamConfig::default();
                write_atomic(&path, &config).await?;
                info!(path = %path.display(), "Configuration file not found, wrote defaults");
                config
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self::with_config(path, config))
    }

    /// Create a store around an already-loaded configuration.
    pub fn with_config(path: impl Into<PathBuf>, config: RestreamConfig) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(config),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A copy of the current configuration.
    pub fn snapshot(&self) -> RestreamConfig {
        self.current.read().clone()
    }

    /// Persist the current configuration.
    pub async fn save(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let config = self.snapshot();
        write_atomic(&self.path, &config).await
    }

    /// Replace the whole configuration.
    pub async fn replace(&self, config: RestreamConfig) -> Result<RestreamConfig> {
        self.update(move |current| {
            *current = config;
            Ok(())
        })
        .await
    }

    /// Add a destination. Rejects a duplicate id or endpoint URL.
    pub async fn add_destination(&self, destination: DestinationConfig) -> Result<RestreamConfig> {
        validate_endpoint(&destination.endpoint_url)?;
        let id = destination.id.clone();
        let redacted = redact_endpoint(&destination.endpoint_url);

        let config = self
            .update(move |config| {
                if let Some(existing) = config.destinations.iter().find(|d| {
                    d.id == destination.id || d.endpoint_url == destination.endpoint_url
                }) {
                    return Err(Error::validation(format!(
                        "destination '{}' already exists",
                        existing.id
                    )));
                }
                config.destinations.push(destination);
                Ok(())
            })
            .await?;

        info!(destination = %id, endpoint = %redacted, "Destination added");
        Ok(config)
    }

    pub async fn remove_destination(&self, id: &str) -> Result<RestreamConfig> {
        let config = self
            .update(|config| {
                let before = config.destinations.len();
                config.destinations.retain(|d| d.id != id);
                if config.destinations.len() == before {
                    return Err(Error::not_found("destination", id));
                }
                Ok(())
            })
            .await?;

        info!(destination = %id, "Destination removed");
        Ok(config)
    }

    pub async fn set_destination_enabled(&self, id: &str, enabled: bool) -> Result<RestreamConfig> {
        let config = self
            .update(|config| {
                let dest = config
                    .destinations
                    .iter_mut()
                    .find(|d| d.id == id)
                    .ok_or_else(|| Error::not_found("destination", id))?;
                dest.enabled = enabled;
                Ok(())
            })
            .await?;

        info!(destination = %id, enabled, "Destination toggled");
        Ok(config)
    }

    /// Change the source channel and, optionally, the stream quality.
    pub async fn update_source(
        &self,
        channel: &str,
        quality: Option<&str>,
    ) -> Result<RestreamConfig> {
        let config = self
            .update(|config| {
                config.source.channel = channel.trim().to_string();
                if let Some(quality) = quality {
                    config.source.quality = quality.trim().to_string();
                }
                Ok(())
            })
            .await?;

        info!(channel = %config.source.channel, quality = %config.source.quality, "Source updated");
        Ok(config)
    }

    /// Persist the log filter directive applied at the next startup.
    pub async fn set_log_filter(&self, directive: &str) -> Result<RestreamConfig> {
        self.update(|config| {
            config.logging.filter = directive.trim().to_string();
            Ok(())
        })
        .await
    }

    async fn update<F>(&self, edit: F) -> Result<RestreamConfig>
    where
        F: FnOnce(&mut RestreamConfig) -> Result<()>,
    {
        let _guard = self.write_lock.lock().await;

        let mut edited = self.snapshot();
        edit(&mut edited)?;
        edited.validate()?;

        write_atomic(&self.path, &edited).await?;
        *self.current.write() = edited.clone();
        Ok(edited)
    }
}

async fn write_atomic(path: &Path, config: &RestreamConfig) -> Result<()> {
    let contents = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "Configuration saved");
    Ok(())
}
