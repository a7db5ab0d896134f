//! Retry policy for email jobs.
//!
//! Decides how many retryable failures a job may consume and how long to
//! wait between attempts, independently of the worker that applies it.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy configuration for email jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retryable failures a job may consume before it is dead-lettered.
    ///
    /// Default: 5 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure (milliseconds), doubled for each
    /// subsequent one.
    ///
    /// Default: 1000 ms
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling for the computed delay, jitter included (milliseconds).
    ///
    /// Default: 300000 ms (5 minutes)
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound (exclusive) of the uniform jitter added to each delay
    /// (milliseconds). Zero disables jitter.
    ///
    /// Default: 1000 ms
    #[serde(default = "defaults::max_jitter_ms")]
    pub max_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            max_jitter_ms: defaults::max_jitter_ms(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a job that has consumed `attempts_made` retryable failures
    /// may be attempted again.
    #[must_use]
    pub const fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before retrying after attempt `attempt` (0-indexed) failed.
    ///
    /// `min(base * 2^attempt + jitter, max)`
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..self.max_jitter_ms)
        };

        Duration::from_millis(self.backoff_with_jitter(attempt, jitter))
    }

    /// Deterministic part of [`backoff`](Self::backoff), in milliseconds.
    #[must_use]
    pub fn backoff_with_jitter(&self, attempt: u32, jitter_ms: u64) -> u64 {
        // 2^64 would overflow; the cap applies long before that
        let exponential = if attempt >= 63 {
            u64::MAX
        } else {
            self.base_delay_ms.saturating_mul(1u64 << attempt)
        };

        exponential
            .saturating_add(jitter_ms)
            .min(self.max_delay_ms)
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        5
    }

    pub const fn base_delay_ms() -> u64 {
        1_000
    }

    pub const fn max_delay_ms() -> u64 {
        300_000 // 5 minutes
    }

    pub const fn max_jitter_ms() -> u64 {
        1_000
    }
}
