//! Email delivery queue
//!
//! Accepts send requests, persists them in a [`QueueBackend`], and delivers
//! them through an [`EmailSender`](tribe_common::EmailSender) with:
//! - bounded concurrency and a global job start rate limit
//! - a [`CircuitBreaker`] around the provider
//! - error [classification](classify) into retryable and permanent failures
//! - exponential backoff with jitter ([`RetryPolicy`])
//! - a dead-letter store for jobs that will not be retried
//!
//! ```text
//! add_email ─> waiting ─> active ─┬─> completed
//!                 ^               ├─> delayed ─(due)─> waiting
//!                 │               └─> dead-letter ─(retry)─┐
//!                 └────────────────────────────────────────┘
//! ```

pub mod backends;
pub mod circuit_breaker;
pub mod classify;
pub mod config;
pub mod dead_letter;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod policy;
pub mod queue;
pub mod rate_limiter;
mod worker;

pub use backends::{JobCounts, MemoryBackend, QueueBackend, TestBackend};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use classify::{Classifier, ErrorCategory, ProviderFailure, classify};
pub use config::QueueConfig;
pub use dead_letter::DeadLetterEntry;
pub use dispatch::{DispatchMode, Dispatched, Dispatcher, Environment};
pub use error::{BackendError, QueueError, ValidationError};
pub use job::{EmailJobData, JobHandle, JobId, StoredJob};
pub use policy::RetryPolicy;
pub use queue::{EmailQueue, EmailQueueBuilder, QueueMetricsSnapshot};
