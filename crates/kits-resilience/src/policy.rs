//! ---
//! dr_section: "03-resilience"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Retry policies and kit health classification."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

/// Attempt budget, backoff schedule, and per-attempt timeout for one step.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub initial_interval: Duration,
    /// Multiplier applied to the delay after each further failure.
    #[serde(default = "default_coefficient")]
    pub backoff_coefficient: f64,
    /// Upper bound on any single delay.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_interval: Duration,
    /// Bound on one attempt; an attempt exceeding it counts as failed.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub attempt_timeout: Duration,
}

fn default_coefficient() -> f64 {
    2.0
}

impl RetryPolicy {
    /// Fixed spacing between attempts.
    pub fn flat(max_attempts: u32, interval: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            backoff_coefficient: 1.0,
            max_interval: interval,
            attempt_timeout,
        }
    }

    /// Exponentially growing spacing between attempts.
    pub fn exponential(
        max_attempts: u32,
        initial_interval: Duration,
        backoff_coefficient: f64,
        max_interval: Duration,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            max_attempts,
            initial_interval,
            backoff_coefficient,
            max_interval,
            attempt_timeout,
        }
    }

    /// One second initial delay doubling up to one hundred seconds.
    pub fn standard(max_attempts: u32, attempt_timeout: Duration) -> Self {
        let initial = Duration::from_secs(1);
        Self::exponential(max_attempts, initial, 2.0, initial * 100, attempt_timeout)
    }

    /// A single attempt with no retry.
    pub fn once(attempt_timeout: Duration) -> Self {
        Self::flat(1, Duration::ZERO, attempt_timeout)
    }

    /// Delay to wait after `attempt` (1-indexed) failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.backoff_coefficient.max(1.0).powi(exponent);
        let delay = self.initial_interval.as_secs_f64() * factor;
        let capped = delay.min(self.max_interval.max(self.initial_interval).as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Reject policies that could never make progress.
    pub fn validate(&self, name: &str) -> Result<()> {
        ensure!(
            self.max_attempts >= 1,
            "retry policy '{}' must allow at least one attempt",
            name
        );
        ensure!(
            !self.attempt_timeout.is_zero(),
            "retry policy '{}' must have a non-zero attempt timeout",
            name
        );
        ensure!(
            self.backoff_coefficient >= 1.0,
            "retry policy '{}' backoff coefficient must be >= 1.0",
            name
        );
        Ok(())
    }
}
