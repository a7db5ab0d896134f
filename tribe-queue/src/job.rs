//! Job records as they move through the queue

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use tribe_common::{EmailOptions, address};

use crate::error::ValidationError;

/// Identifier of a queued job
///
/// Either supplied by the caller (making enqueue idempotent) or a freshly
/// generated ULID, which sorts by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a new time-ordered identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Payload of one email job, as submitted by a caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailJobData {
    #[serde(flatten)]
    pub email: EmailOptions,

    /// Free-form data the message was rendered from, kept for operators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_data: Option<serde_json::Value>,

    /// Caller-supplied id; resubmitting the same id is a no-op while the
    /// job is live or dead-lettered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    /// Attempt this payload is on, stamped by the worker before each send
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_number: Option<u32>,
}

impl EmailJobData {
    /// Build a job for `to` with the given subject and HTML body
    pub fn new(to: impl Into<String>, subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            email: EmailOptions {
                to: to.into(),
                subject: subject.into(),
                html: html.into(),
                ..EmailOptions::default()
            },
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    /// Strip surrounding whitespace from the addresses, which is what
    /// [`validate`](Self::validate) checks and what the provider receives
    pub fn normalize(&mut self) {
        trim_in_place(&mut self.email.to);
        for address in [&mut self.email.from, &mut self.email.reply_to]
            .into_iter()
            .flatten()
        {
            trim_in_place(address);
        }
    }

    /// Check the job can be accepted
    ///
    /// Only structurally impossible input is rejected here; provider-level
    /// problems surface through the dead-letter store instead.
    pub fn validate(&self) -> Result<(), ValidationError> {
        address::validate(&self.email.to)?;

        if self.email.subject.trim().is_empty() {
            return Err(ValidationError::MissingSubject);
        }

        if self.email.html.is_empty() && self.email.text.is_empty() {
            return Err(ValidationError::MissingBody);
        }

        if self.job_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(ValidationError::EmptyJobId);
        }

        Ok(())
    }
}

fn trim_in_place(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

/// A job plus the bookkeeping the backend keeps for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredJob {
    pub id: JobId,
    pub data: EmailJobData,
    /// Retryable failures consumed so far
    pub attempts_made: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Milliseconds since the Unix epoch
    pub enqueued_at: u64,
}

impl StoredJob {
    /// Wrap validated job data, taking the caller's id or generating one
    #[must_use]
    pub fn new(data: EmailJobData) -> Self {
        let id = data
            .job_id
            .as_deref()
            .map_or_else(JobId::generate, JobId::from);

        Self {
            id,
            data,
            attempts_made: 0,
            last_error: None,
            enqueued_at: now_ms(),
        }
    }
}

/// Result of accepting a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: JobId,
    /// `true` when a job with this id already existed and nothing new was
    /// written
    pub deduplicated: bool,
}

/// Current wall-clock time in milliseconds since the Unix epoch
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}
