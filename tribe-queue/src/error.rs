//! Typed errors for the email queue.
//!
//! Only failures of the enqueue path and of operator commands are surfaced
//! through these types. Per-attempt delivery failures are classified and
//! recorded against the job; they never reach the enqueuing caller.

use thiserror::Error;
use tribe_common::AddressError;

/// Top-level queue error type.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The job was rejected before reaching the backend.
    #[error("Invalid job: {0}")]
    Validation(#[from] ValidationError),

    /// The backend could not complete the operation.
    #[error("Queue backend error: {0}")]
    Backend(#[from] BackendError),

    /// The queue has been closed and no longer accepts work.
    #[error("Queue is closed")]
    Closed,

    /// The queue could not be constructed from its configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl QueueError {
    /// Returns `true` when the caller should report the service as
    /// temporarily unavailable (HTTP 503) rather than a bad request.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Backend(BackendError::Unavailable(_) | BackendError::Closed)
        ) || self.is_redis_unavailable()
    }

    #[cfg(feature = "redis")]
    const fn is_redis_unavailable(&self) -> bool {
        matches!(self, Self::Backend(BackendError::Redis(_)))
    }

    #[cfg(not(feature = "redis"))]
    const fn is_redis_unavailable(&self) -> bool {
        false
    }
}

/// Reasons a job is refused at enqueue time.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Recipient address rejected: {0}")]
    Recipient(#[from] AddressError),

    #[error("Subject is required")]
    MissingSubject,

    #[error("Either an HTML or a text body is required")]
    MissingBody,

    #[error("Job id must not be empty")]
    EmptyJobId,

    /// Wraps the failing job's position in a bulk request.
    #[error("Job {index} in batch: {source}")]
    InBatch {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

/// Failures raised by a [`QueueBackend`](crate::backends::QueueBackend).
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend could not be reached (or fault injection is active).
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The in-memory backend reached its configured capacity.
    #[error("Backend capacity exceeded: {current}/{capacity} jobs")]
    CapacityExceeded { current: usize, capacity: usize },

    /// The backend connection has been closed.
    #[error("Backend is closed")]
    Closed,
}

pub type Result<T, E = QueueError> = std::result::Result<T, E>;
