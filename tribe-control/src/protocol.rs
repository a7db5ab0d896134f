//! Control protocol types
//!
//! Everything here crosses the socket as bincode, so the types avoid
//! skipped fields and self-describing values.

use std::fmt::{self, Display, Formatter};

use chrono::{TimeZone, Utc, offset::LocalResult};
use serde::{Deserialize, Serialize};
use tribe_common::EmailOptions;
use tribe_queue::{
    CircuitBreakerStats, DeadLetterEntry, EmailJobData, JobHandle, QueueMetricsSnapshot,
};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Format milliseconds since the epoch for display
fn format_timestamp(timestamp_ms: u64) -> String {
    let datetime = Utc.timestamp_millis_opt(i64::try_from(timestamp_ms).unwrap_or(0));
    if let LocalResult::Single(dt) = datetime {
        dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    } else {
        "unknown".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub version: u32,
    pub command: RequestCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestCommand {
    System(SystemCommand),
    Queue(QueueCommand),
    Circuit(CircuitCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemCommand {
    Ping,
    /// Version, uptime and dispatch mode
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueCommand {
    /// Job counts and circuit state
    Metrics,
    /// List dead-letter entries, oldest first
    DeadLetters,
    /// Re-enqueue a dead-lettered job under a fresh id
    Retry { job_id: String },
    /// Delete a dead-letter entry
    Purge { job_id: String },
    /// Submit a new email
    Enqueue(EmailRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitCommand {
    State,
    /// Force the breaker closed
    Reset,
}

/// Email submitted through the control socket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRequest {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub from: Option<String>,
    pub reply_to: Option<String>,
    pub categories: Vec<String>,
    /// Idempotency key
    pub job_id: Option<String>,
}

impl From<EmailRequest> for EmailJobData {
    fn from(request: EmailRequest) -> Self {
        Self {
            email: EmailOptions {
                to: request.to,
                from: request.from,
                reply_to: request.reply_to,
                subject: request.subject,
                html: request.html,
                text: request.text,
                categories: request.categories,
                ..EmailOptions::default()
            },
            job_id: request.job_id,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub version: u32,
    pub payload: ResponsePayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponsePayload {
    Ok,
    Data(Box<ResponseData>),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseData {
    SystemStatus(SystemStatus),
    QueueMetrics(QueueSummary),
    DeadLetters(Vec<DeadLetterSummary>),
    /// Enqueue result
    Enqueued(JobSummary),
    /// Dead-letter retry; `None` when no entry had that id
    Retried(Option<JobSummary>),
    /// Whether an entry was purged
    Purged(bool),
    Circuit(CircuitSummary),
    Message(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_secs: u64,
    /// `queued` or `direct`
    pub mode: String,
    pub worker_running: bool,
}

impl Display for SystemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Version:   {}", self.version)?;
        writeln!(f, "Uptime:    {}s", self.uptime_secs)?;
        writeln!(f, "Mode:      {}", self.mode)?;
        write!(f, "Worker:    {}", if self.worker_running { "running" } else { "stopped" })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub dead_letter: u64,
    pub circuit_breaker: String,
}

impl From<&QueueMetricsSnapshot> for QueueSummary {
    fn from(snapshot: &QueueMetricsSnapshot) -> Self {
        Self {
            waiting: snapshot.waiting,
            active: snapshot.active,
            completed: snapshot.completed,
            failed: snapshot.failed,
            delayed: snapshot.delayed,
            dead_letter: snapshot.dead_letter,
            circuit_breaker: snapshot.circuit_breaker.to_string(),
        }
    }
}

impl Display for QueueSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Waiting:     {}", self.waiting)?;
        writeln!(f, "Active:      {}", self.active)?;
        writeln!(f, "Delayed:     {}", self.delayed)?;
        writeln!(f, "Completed:   {}", self.completed)?;
        writeln!(f, "Failed:      {}", self.failed)?;
        writeln!(f, "Dead letter: {}", self.dead_letter)?;
        write!(f, "Circuit:     {}", self.circuit_breaker)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterSummary {
    pub job_id: String,
    pub to: String,
    pub subject: String,
    pub category: String,
    pub error_message: String,
    pub status_code: Option<u16>,
    pub attempts_made: u32,
    pub failed_at: u64,
}

impl From<&DeadLetterEntry> for DeadLetterSummary {
    fn from(entry: &DeadLetterEntry) -> Self {
        Self {
            job_id: entry.job_id.to_string(),
            to: entry.data.email.to.clone(),
            subject: entry.data.email.subject.clone(),
            category: entry.category.to_string(),
            error_message: entry.error_message.clone(),
            status_code: entry.status_code,
            attempts_made: entry.attempts_made,
            failed_at: entry.failed_at,
        }
    }
}

impl Display for DeadLetterSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "ID:        {}", self.job_id)?;
        writeln!(f, "To:        {}", self.to)?;
        writeln!(f, "Subject:   {}", self.subject)?;
        writeln!(f, "Category:  {}", self.category)?;
        if let Some(status) = self.status_code {
            writeln!(f, "Status:    {status}")?;
        }
        writeln!(f, "Error:     {}", self.error_message)?;
        writeln!(f, "Attempts:  {}", self.attempts_made)?;
        write!(f, "Failed at: {}", format_timestamp(self.failed_at))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub deduplicated: bool,
}

impl From<&JobHandle> for JobSummary {
    fn from(handle: &JobHandle) -> Self {
        Self {
            job_id: handle.id.to_string(),
            deduplicated: handle.deduplicated,
        }
    }
}

impl Display for JobSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.deduplicated {
            write!(f, "{} (already queued)", self.job_id)
        } else {
            f.write_str(&self.job_id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSummary {
    pub state: String,
    pub failure_count: u32,
    pub consecutive_successes: u32,
}

impl From<CircuitBreakerStats> for CircuitSummary {
    fn from(stats: CircuitBreakerStats) -> Self {
        Self {
            state: stats.state.to_string(),
            failure_count: stats.failure_count,
            consecutive_successes: stats.consecutive_successes,
        }
    }
}

impl Display for CircuitSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "State:     {}", self.state)?;
        writeln!(f, "Failures:  {}", self.failure_count)?;
        write!(f, "Successes: {}", self.consecutive_successes)
    }
}

impl Request {
    #[must_use]
    pub const fn new(command: RequestCommand) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            command,
        }
    }

    /// Only an exact version match is accepted
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

impl Response {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Error(message.into()),
        }
    }

    #[must_use]
    pub const fn ok() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Ok,
        }
    }

    #[must_use]
    pub fn data(data: ResponseData) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Data(Box::new(data)),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.payload, ResponsePayload::Error(_))
    }

    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}
