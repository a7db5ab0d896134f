//! Queue or direct delivery, depending on deployment
//!
//! Without a durable backend the service can still send mail in
//! development by calling the provider inline. Production refuses to run
//! that way, since a provider outage would then lose mail.

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use tribe_common::{EmailDeliveryResult, EmailSender, tracing::warn};

use crate::{
    circuit_breaker::{CircuitBreaker, CircuitError},
    config::QueueConfig,
    error::{QueueError, Result},
    job::{EmailJobData, JobHandle},
    queue::EmailQueue,
};

/// Deployment environment, from `TRIBE_ENV`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl FromStr for Environment {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            other => Err(QueueError::Configuration(format!("Unknown environment: {other}"))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        })
    }
}

/// What a dispatch produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Accepted by the queue; delivery happens later
    Queued(JobHandle),
    /// Sent inline; this is the provider's answer
    Sent(EmailDeliveryResult),
}

/// Mode the dispatcher runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    Queued,
    Direct,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Direct => "direct",
        })
    }
}

pub enum Dispatcher {
    Queued(EmailQueue),
    Direct {
        sender: Arc<dyn EmailSender>,
        breaker: Arc<CircuitBreaker>,
    },
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued(queue) => f.debug_tuple("Queued").field(queue).finish(),
            Self::Direct { breaker, .. } => f
                .debug_struct("Direct")
                .field("breaker", &breaker.state())
                .finish_non_exhaustive(),
        }
    }
}

impl Dispatcher {
    /// Decide the mode from the queue configuration
    ///
    /// With a backend URL the queue is built (connecting to the backend).
    /// Without one, production is a configuration error and every other
    /// environment falls back to direct sends with a warning.
    pub async fn from_config(
        config: QueueConfig,
        environment: Environment,
        sender: Arc<dyn EmailSender>,
    ) -> Result<Self> {
        if config.has_backend_url() {
            return Ok(Self::Queued(EmailQueue::builder(config).build().await?));
        }

        if environment == Environment::Production {
            return Err(QueueError::Configuration(
                "A queue backend URL (TRIBE_QUEUE_URL or REDIS_URL) is required in production"
                    .to_string(),
            ));
        }

        warn!(
            %environment,
            "No queue backend configured, emails will be sent synchronously without retries"
        );

        Ok(Self::Direct {
            sender,
            breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker)),
        })
    }

    #[must_use]
    pub const fn mode(&self) -> DispatchMode {
        match self {
            Self::Queued(_) => DispatchMode::Queued,
            Self::Direct { .. } => DispatchMode::Direct,
        }
    }

    #[must_use]
    pub const fn queue(&self) -> Option<&EmailQueue> {
        match self {
            Self::Queued(queue) => Some(queue),
            Self::Direct { .. } => None,
        }
    }

    #[must_use]
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        match self {
            Self::Queued(queue) => queue.circuit_breaker(),
            Self::Direct { breaker, .. } => breaker,
        }
    }

    /// Queue the job, or send it now in direct mode
    ///
    /// In direct mode a provider rejection comes back as
    /// `Dispatched::Sent` with `success: false`; an open circuit or a
    /// transport failure comes back as an unsuccessful result too.
    pub async fn dispatch(&self, mut data: EmailJobData) -> Result<Dispatched> {
        match self {
            Self::Queued(queue) => queue.add_email(data).await.map(Dispatched::Queued),
            Self::Direct { sender, breaker } => {
                data.normalize();
                data.validate()?;

                let outcome = breaker
                    .call(|| async {
                        match sender.send(&data.email).await {
                            Ok(result) if result.success => Ok(result),
                            Ok(result) => Err(result),
                            Err(e) => Err(EmailDeliveryResult::rejected(None, e.to_string())),
                        }
                    })
                    .await;

                Ok(Dispatched::Sent(match outcome {
                    Ok(result) | Err(CircuitError::Inner(result)) => result,
                    Err(CircuitError::Open) => {
                        EmailDeliveryResult::rejected(None, "circuit breaker is open")
                    }
                }))
            }
        }
    }

    /// Close the queue, if there is one
    pub async fn close(&self) -> Result<()> {
        match self {
            Self::Queued(queue) => queue.close().await,
            Self::Direct { .. } => Ok(()),
        }
    }
}
