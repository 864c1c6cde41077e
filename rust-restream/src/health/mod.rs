//! Publisher health classification.
//!
//! Sampling reads the latest values the encoder tasks published and never
//! blocks. The classification itself is a pure function of the current
//! state, an observation and the clock.

use std::time::Duration;

use tokio::time::Instant;

use crate::Error;
use crate::config::EngineTuning;
use crate::encoder::ExitInfo;
use crate::publisher::{PublisherHandle, PublisherState};

/// Health thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    pub startup_grace: Duration,
    pub stall_timeout: Duration,
    /// Silence since the last progress after which a stalled publisher fails.
    pub hard_timeout: Duration,
}

impl From<&EngineTuning> for HealthConfig {
    fn from(tuning: &EngineTuning) -> Self {
        Self {
            startup_grace: tuning.startup_grace(),
            stall_timeout: tuning.stall_timeout(),
            hard_timeout: tuning.hard_timeout(),
        }
    }
}

/// What the monitor saw of one process instance.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub destination_id: String,
    pub started_at: Option<Instant>,
    pub last_progress_at: Option<Instant>,
    pub exited: Option<ExitInfo>,
    /// No process is attached to the handle.
    pub missing: bool,
}

/// Result of classifying one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthVerdict {
    pub state: PublisherState,
    /// Set when the verdict is FAILED.
    pub reason: Option<String>,
}

impl HealthVerdict {
    fn keep(state: PublisherState) -> Self {
        Self {
            state,
            reason: None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: PublisherState::Failed,
            reason: Some(reason.into()),
        }
    }
}

/// Classify a publisher's health.
pub fn classify(
    current: PublisherState,
    observation: &Observation,
    now: Instant,
    config: &HealthConfig,
) -> HealthVerdict {
    // Terminal for this process instance; the supervisor decides what next.
    if matches!(current, PublisherState::Failed | PublisherState::Stopped) {
        return HealthVerdict::keep(current);
    }

    if let Some(exit) = &observation.exited {
        return HealthVerdict::failed(format!("encoder {exit}"));
    }
    if observation.missing {
        return HealthVerdict::failed("encoder process missing");
    }

    let started_at = observation.started_at.unwrap_or(now);

    match current {
        PublisherState::Starting => {
            if observation.last_progress_at.is_some() {
                HealthVerdict::keep(PublisherState::Running)
            } else if now.saturating_duration_since(started_at) >= config.startup_grace {
                HealthVerdict::failed(format!(
                    "no output within startup grace of {}s",
                    config.startup_grace.as_secs()
                ))
            } else {
                HealthVerdict::keep(PublisherState::Starting)
            }
        }
        PublisherState::Running | PublisherState::Stalled => {
            let last = observation.last_progress_at.unwrap_or(started_at);
            let silence = now.saturating_duration_since(last);

            if silence >= config.hard_timeout {
                let err = Error::StallTimeout {
                    destination: observation.destination_id.clone(),
                    elapsed: Duration::from_millis(silence.as_millis() as u64),
                };
                HealthVerdict::failed(err.to_string())
            } else if silence >= config.stall_timeout {
                HealthVerdict::keep(PublisherState::Stalled)
            } else {
                HealthVerdict::keep(PublisherState::Running)
            }
        }
        PublisherState::Failed | PublisherState::Stopped => HealthVerdict::keep(current),
    }
}

/// Samples publisher handles against the configured thresholds.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: HealthConfig) {
        self.config = config;
    }

    /// Observe the handle's process without blocking.
    pub fn observe(&self, handle: &PublisherHandle) -> Observation {
        match handle.process() {
            Some(process) => Observation {
                destination_id: handle.destination_id().to_string(),
                started_at: handle.started_at(),
                last_progress_at: process.progress().last_advanced_at,
                exited: process.exit_status(),
                missing: false,
            },
            None => Observation {
                destination_id: handle.destination_id().to_string(),
                started_at: handle.started_at(),
                last_progress_at: handle.last_output_progress_at(),
                exited: None,
                missing: true,
            },
        }
    }

    /// Classify the handle as of `now`.
    pub fn sample(&self, handle: &PublisherHandle, now: Instant) -> (Observation, HealthVerdict) {
        let observation = self.observe(handle);
        let verdict = classify(handle.state(), &observation, now, &self.config);
        (observation, verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HealthConfig {
        HealthConfig {
            startup_grace: Duration::from_secs(20),
            stall_timeout: Duration::from_secs(15),
            hard_timeout: Duration::from_secs(45),
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn observed(started_at: Instant, last_progress_at: Option<Instant>) -> Observation {
        Observation {
            destination_id: "yt".to_string(),
            started_at: Some(started_at),
            last_progress_at,
            exited: None,
            missing: false,
        }
    }

    #[test]
    fn test_starting_to_running_on_first_progress() {
        let t0 = Instant::now();
        let obs = observed(t0, Some(t0 + secs(2)));
        let verdict = classify(PublisherState::Starting, &obs, t0 + secs(3), &config());
        assert_eq!(verdict.state, PublisherState::Running);
    }

    #[test]
    fn test_starting_waits_within_grace() {
        let t0 = Instant::now();
        let obs = observed(t0, None);
        let verdict = classify(PublisherState::Starting, &obs, t0 + secs(19), &config());
        assert_eq!(verdict.state, PublisherState::Starting);
    }

    #[test]
    fn test_starting_fails_after_grace() {
        let t0 = Instant::now();
        let obs = observed(t0, None);
        let verdict = classify(PublisherState::Starting, &obs, t0 + secs(20), &config());
        assert_eq!(verdict.state, PublisherState::Failed);
        assert!(verdict.reason.unwrap().contains("startup grace"));
    }

    #[test]
    fn test_running_stalls_then_recovers() {
        let t0 = Instant::now();
        let obs = observed(t0, Some(t0 + secs(1)));

        let stalled = classify(PublisherState::Running, &obs, t0 + secs(16), &config());
        assert_eq!(stalled.state, PublisherState::Stalled);

        let resumed = observed(t0, Some(t0 + secs(17)));
        let verdict = classify(PublisherState::Stalled, &resumed, t0 + secs(18), &config());
        assert_eq!(verdict.state, PublisherState::Running);
    }

    #[test]
    fn test_stalled_fails_after_hard_timeout() {
        let t0 = Instant::now();
        let obs = observed(t0, Some(t0 + secs(1)));

        let still_stalled = classify(PublisherState::Stalled, &obs, t0 + secs(45), &config());
        assert_eq!(still_stalled.state, PublisherState::Stalled);

        let failed = classify(PublisherState::Stalled, &obs, t0 + secs(46), &config());
        assert_eq!(failed.state, PublisherState::Failed);
        assert_eq!(
            failed.reason.as_deref(),
            Some("No output progress from destination yt for 45s")
        );
    }

    #[test]
    fn test_any_exit_fails() {
        let t0 = Instant::now();
        let mut obs = observed(t0, Some(t0));
        obs.exited = Some(ExitInfo {
            code: Some(0),
            detail: "exit status: 0".to_string(),
        });

        for state in [
            PublisherState::Starting,
            PublisherState::Running,
            PublisherState::Stalled,
        ] {
            let verdict = classify(state, &obs, t0 + secs(1), &config());
            assert_eq!(verdict.state, PublisherState::Failed);
            assert!(verdict.reason.unwrap().contains("exited with code 0"));
        }
    }

    #[test]
    fn test_terminal_states_are_kept() {
        let t0 = Instant::now();
        let obs = Observation {
            missing: true,
            ..Default::default()
        };
        for state in [PublisherState::Failed, PublisherState::Stopped] {
            assert_eq!(classify(state, &obs, t0, &config()).state, state);
        }
    }

    #[test]
    fn test_missing_process_fails() {
        let obs = Observation {
            missing: true,
            ..Default::default()
        };
        let verdict = classify(PublisherState::Running, &obs, Instant::now(), &config());
        assert_eq!(verdict.state, PublisherState::Failed);
    }
}
