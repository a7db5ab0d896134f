use std::time::Duration;

use serde::Deserialize;

use crate::{circuit_breaker::CircuitBreakerConfig, policy::RetryPolicy};

const fn default_concurrency() -> usize {
    10
}

const fn default_rate_limit() -> u32 {
    100
}

const fn default_poll_interval_ms() -> u64 {
    250
}

const fn default_stalled_after_secs() -> u64 {
    300
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

const fn default_command_timeout_ms() -> u64 {
    5_000
}

fn default_key_prefix() -> String {
    "tribe:email".to_string()
}

/// Queue and worker settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueConfig {
    /// Backend connection string (`redis://...`); `memory://` or unset
    /// selects the in-process backend
    #[serde(default)]
    pub url: Option<String>,

    /// Maximum number of jobs processed at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Job starts per second across all workers (0 disables)
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,

    /// Token bucket size; defaults to `rate_limit`
    #[serde(default)]
    pub rate_limit_burst: Option<u32>,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// How long an idle worker waits before polling for due jobs
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Jobs active for longer than this are returned to waiting
    #[serde(default = "default_stalled_after_secs")]
    pub stalled_after_secs: u64,

    /// Time in-flight jobs get to finish when the worker stops
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Timeout for a single backend round-trip
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Namespace for Redis keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: None,
            concurrency: default_concurrency(),
            rate_limit: default_rate_limit(),
            rate_limit_burst: None,
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            poll_interval_ms: default_poll_interval_ms(),
            stalled_after_secs: default_stalled_after_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            command_timeout_ms: default_command_timeout_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl QueueConfig {
    /// Apply environment overrides
    ///
    /// `lookup` is usually `|key| std::env::var(key).ok()`. Values that do
    /// not parse are ignored with a warning.
    #[must_use]
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TRIBE_QUEUE_URL").or_else(|| lookup("REDIS_URL"))
            && !url.trim().is_empty()
        {
            self.url = Some(url);
        }

        override_parsed(&lookup, "EMAIL_QUEUE_MAX_ATTEMPTS", &mut self.retry.max_attempts);
        override_parsed(&lookup, "EMAIL_QUEUE_CONCURRENCY", &mut self.concurrency);
        override_parsed(&lookup, "EMAIL_QUEUE_RATE_LIMIT", &mut self.rate_limit);
        override_parsed(
            &lookup,
            "CIRCUIT_BREAKER_FAILURE_THRESHOLD",
            &mut self.circuit_breaker.failure_threshold,
        );
        override_parsed(
            &lookup,
            "CIRCUIT_BREAKER_SUCCESS_THRESHOLD",
            &mut self.circuit_breaker.success_threshold,
        );

        let mut timeout_secs: Option<u64> = None;
        override_parsed(&lookup, "CIRCUIT_BREAKER_TIMEOUT_SECS", &mut timeout_secs);
        if let Some(secs) = timeout_secs {
            self.circuit_breaker.timeout_ms = secs.saturating_mul(1_000);
        }

        self
    }

    /// `true` when a durable backend URL is configured
    #[must_use]
    pub fn has_backend_url(&self) -> bool {
        self.url
            .as_deref()
            .is_some_and(|url| !url.is_empty() && !url.starts_with("memory://"))
    }

    #[must_use]
    pub fn burst(&self) -> u32 {
        self.rate_limit_burst.unwrap_or(self.rate_limit)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn stalled_after(&self) -> Duration {
        Duration::from_secs(self.stalled_after_secs)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

trait ParseTarget: Sized {
    fn parse_value(raw: &str) -> Option<Self>;
}

macro_rules! parse_target {
    ($($ty:ty),*) => {
        $(impl ParseTarget for $ty {
            fn parse_value(raw: &str) -> Option<Self> {
                raw.trim().parse().ok()
            }
        })*
    };
}

parse_target!(u32, u64, usize);

impl<T: ParseTarget> ParseTarget for Option<T> {
    fn parse_value(raw: &str) -> Option<Self> {
        T::parse_value(raw).map(Some)
    }
}

fn override_parsed<T, F>(lookup: &F, key: &str, target: &mut T)
where
    T: ParseTarget,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match T::parse_value(&raw) {
            Some(value) => *target = value,
            None => tracing::warn!(key, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.rate_limit, 100);
        assert_eq!(config.burst(), 100);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.success_threshold, 2);
        assert_eq!(config.circuit_breaker.timeout_ms, 60_000);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert!(!config.has_backend_url());
    }

    #[test]
    fn test_env_overrides() {
        let config = QueueConfig::default().with_env(env(&[
            ("REDIS_URL", "redis://cache:6379/2"),
            ("EMAIL_QUEUE_MAX_ATTEMPTS", "8"),
            ("EMAIL_QUEUE_CONCURRENCY", " 4 "),
            ("EMAIL_QUEUE_RATE_LIMIT", "not-a-number"),
            ("CIRCUIT_BREAKER_TIMEOUT_SECS", "15"),
        ]));

        assert_eq!(config.url.as_deref(), Some("redis://cache:6379/2"));
        assert!(config.has_backend_url());
        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.rate_limit, 100);
        assert_eq!(config.circuit_breaker.timeout_ms, 15_000);
    }

    #[test]
    fn test_queue_url_wins_over_redis_url() {
        let config = QueueConfig::default().with_env(env(&[
            ("TRIBE_QUEUE_URL", "redis://primary"),
            ("REDIS_URL", "redis://fallback"),
        ]));
        assert_eq!(config.url.as_deref(), Some("redis://primary"));
    }

    #[test]
    fn test_memory_url_is_not_durable() {
        let config = QueueConfig {
            url: Some("memory://".to_string()),
            ..QueueConfig::default()
        };
        assert!(!config.has_backend_url());
    }

    #[test]
    fn test_ron_partial_config() {
        let config: QueueConfig = ron::from_str(
            r#"(
                url: Some("redis://localhost"),
                concurrency: 2,
                retry: (max_attempts: 3),
                circuit_breaker: (timeout_ms: 1000),
            )"#,
        )
        .unwrap();

        assert_eq!(config.concurrency, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.circuit_breaker.timeout_ms, 1_000);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }
}
