//! Health check endpoints for the Tribe mail service
//!
//! # Endpoints
//!
//! - **`/health/live`**: 200 while the process can answer at all
//! - **`/health/ready`**: 200 while the queue can take and deliver mail
//!
//! The daemon owns a [`HealthChecker`] and updates it as components come
//! up, fail or recover; the server only reads it.

mod checker;
mod config;
mod error;
mod server;

pub use checker::{HealthChecker, HealthStatus};
pub use config::HealthConfig;
pub use error::HealthError;
pub use server::HealthServer;
