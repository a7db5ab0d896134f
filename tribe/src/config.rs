//! Daemon configuration
//!
//! Read from a RON file, then overridden from the environment:
//!
//! ```ron
//! (
//!     environment: production,
//!     queue: (url: Some("redis://127.0.0.1:6379"), concurrency: 10),
//!     sendgrid: (from_email: "noreply@example.com"),
//!     health: (listen_address: "[::]:8080"),
//!     control: (socket_path: "/run/tribe/tribe.sock"),
//! )
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tribe_control::DEFAULT_CONTROL_SOCKET;
use tribe_health::HealthConfig;
use tribe_metrics::MetricsConfig;
use tribe_queue::{Environment, QueueConfig};
use tribe_sendgrid::SendGridConfig;

const DEFAULT_PATHS: [&str; 2] = ["./tribe.config.ron", "/etc/tribe/tribe.config.ron"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TRIBE_CONFIG points to non-existent file: {0}")]
    MissingFile(PathBuf),

    #[error("Failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: ron::error::SpannedError,
    },

    #[error("Invalid TRIBE_ENV: {0}")]
    Environment(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_enabled")]
    pub enabled: bool,

    #[serde(default = "default_socket_path")]
    pub socket_path: String,
}

const fn default_control_enabled() -> bool {
    true
}

fn default_socket_path() -> String {
    DEFAULT_CONTROL_SOCKET.to_string()
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: default_control_enabled(),
            socket_path: default_socket_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TribeConfig {
    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub sendgrid: SendGridConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub control: ControlConfig,
}

impl TribeConfig {
    /// Locate, parse and override from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// [`TribeConfig::load`] with an explicit environment
    ///
    /// Without a config file the defaults are used.
    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = match find_config_file(&lookup)? {
            Some(path) => Self::from_file(&path)?,
            None => {
                tribe_common::internal!(
                    level = INFO,
                    "No configuration file found, using defaults"
                );
                Self::default()
            }
        };

        config.with_env(lookup)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        ron::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides on top of the file
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup("TRIBE_ENV").filter(|v| !v.trim().is_empty()) {
            self.environment = env.parse().map_err(|_| ConfigError::Environment(env))?;
        }

        if let Some(socket) = lookup("TRIBE_CONTROL_SOCKET").filter(|v| !v.trim().is_empty()) {
            self.control.socket_path = socket;
        }

        self.queue = self.queue.with_env(&lookup);
        self.sendgrid = self.sendgrid.with_env(&lookup);

        Ok(self)
    }
}

/// Precedence: `TRIBE_CONFIG`, `./tribe.config.ron`, `/etc/tribe/tribe.config.ron`
fn find_config_file<F>(lookup: &F) -> Result<Option<PathBuf>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(env_path) = lookup("TRIBE_CONFIG") {
        let path = PathBuf::from(env_path);
        return if path.exists() {
            Ok(Some(path))
        } else {
            Err(ConfigError::MissingFile(path))
        };
    }

    Ok(DEFAULT_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists()))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, io::Write};

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
    fn test_parse_full_file() {
        let config: TribeConfig = ron::from_str(
            r#"(
                environment: production,
                queue: (url: Some("redis://cache:6379"), concurrency: 4),
                sendgrid: (api_key: "SG.file", from_email: "noreply@example.com"),
                health: (enabled: false),
                metrics: (enabled: true),
                control: (socket_path: "/run/tribe.sock"),
            )"#,
        )
        .unwrap();

        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.queue.url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.queue.concurrency, 4);
        assert_eq!(config.queue.rate_limit, 100);
        assert!(!config.health.enabled);
        assert!(config.metrics.enabled);
        assert_eq!(config.control.socket_path, "/run/tribe.sock");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "(queue: (concurrency: 3), sendgrid: (from_email: \"a@b\"))").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = TribeConfig::load_with(env(&[
            ("TRIBE_CONFIG", path.as_str()),
            ("TRIBE_ENV", "test"),
            ("EMAIL_QUEUE_CONCURRENCY", "8"),
            ("REDIS_URL", "redis://localhost"),
            ("SENDGRID_API_KEY", "SG.env"),
            ("TRIBE_CONTROL_SOCKET", "/tmp/other.sock"),
        ]))
        .unwrap();

        assert_eq!(config.environment, Environment::Test);
        assert_eq!(config.queue.concurrency, 8);
        assert_eq!(config.queue.url.as_deref(), Some("redis://localhost"));
        assert_eq!(config.sendgrid.api_key, "SG.env");
        assert_eq!(config.sendgrid.from_email, "a@b");
        assert_eq!(config.control.socket_path, "/tmp/other.sock");
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = TribeConfig::load_with(env(&[("TRIBE_CONFIG", "/nonexistent/tribe.ron")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile(_)));
    }

    #[test]
    fn test_bad_environment() {
        let err = TribeConfig::default()
            .with_env(env(&[("TRIBE_ENV", "staging")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Environment(ref e) if e == "staging"));
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "(queue: (concurrency: \"many\"))").unwrap();

        let err = TribeConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }
}
