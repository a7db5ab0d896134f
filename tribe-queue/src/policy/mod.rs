//! Retry and backoff policy

pub mod retry;

pub use retry::RetryPolicy;
