//! Restart backoff for one destination.
//!
//! # Backoff Algorithm
//!
//! - Failures up to the threshold within the failure window: immediate restart
//! - After that: backoff = base * 2^(failures - threshold - 1)
//! - Backoff is capped at max_backoff
//! - Failures older than the window are forgotten
//!
//! Restarts are never refused, only delayed.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::RestartBackoffConfig;

/// Maximum exponent to prevent overflow.
const MAX_EXPONENT: u32 = 10;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub failure_window: Duration,
    /// Failures within the window that restart immediately.
    pub failure_threshold: usize,
}

impl From<&RestartBackoffConfig> for BackoffPolicy {
    fn from(config: &RestartBackoffConfig) -> Self {
        Self {
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            failure_window: Duration::from_millis(config.failure_window_ms),
            failure_threshold: config.failure_threshold,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&RestartBackoffConfig::default())
    }
}

/// Failure history and restart gate of one destination.
#[derive(Debug, Clone)]
pub struct RestartBackoff {
    policy: BackoffPolicy,
    failures: VecDeque<Instant>,
    not_before: Option<Instant>,
}

impl RestartBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: VecDeque::new(),
            not_before: None,
        }
    }

    pub fn set_policy(&mut self, policy: BackoffPolicy) {
        self.policy = policy;
    }

    /// Record a failure and return how long the restart is held back.
    pub fn record_failure(&mut self, destination_id: &str, now: Instant) -> Duration {
        self.forget_old(now);
        self.failures.push_back(now);

        let failures = self.failures.len();
        let backoff = self.calculate_backoff(failures);
        self.not_before = Some(now + backoff);

        if backoff.is_zero() {
            debug!(
                "Destination {} failed ({} times in window), immediate restart",
                destination_id, failures
            );
        } else {
            info!(
                "Destination {} failed ({} times in window), backoff: {:?}",
                destination_id, failures, backoff
            );
        }

        backoff
    }

    /// Whether a restart may happen at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|t| now >= t)
    }

    /// Number of failures within the window.
    pub fn recent_failures(&self, now: Instant) -> usize {
        self.failures
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) < self.policy.failure_window)
            .count()
    }

    fn forget_old(&mut self, now: Instant) {
        let window = self.policy.failure_window;
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest) < window {
                break;
            }
            self.failures.pop_front();
        }
    }

    fn calculate_backoff(&self, failures: usize) -> Duration {
        if failures <= self.policy.failure_threshold {
            return Duration::ZERO;
        }

        let exponent =
            (failures - self.policy.failure_threshold - 1).min(MAX_EXPONENT as usize) as u32;
        let multiplier = 2u32.saturating_pow(exponent);
        let backoff = self.policy.base_backoff.saturating_mul(multiplier);

        backoff.min(self.policy.max_backoff)
    }
}
