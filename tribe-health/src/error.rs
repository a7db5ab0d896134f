use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("Failed to bind health server to {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("Health server error: {0}")]
    Server(String),
}
