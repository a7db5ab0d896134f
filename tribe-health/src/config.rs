use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthConfig {
    /// When disabled, the health server is not started
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Address to bind, e.g. `[::]:8080` or `127.0.0.1:8080`
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Readiness fails once this many jobs are waiting
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: u64,
}

const fn default_enabled() -> bool {
    true
}

fn default_listen_address() -> String {
    "[::]:8080".to_string()
}

const fn default_max_queue_size() -> u64 {
    10_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            listen_address: default_listen_address(),
            max_queue_size: default_max_queue_size(),
        }
    }
}
