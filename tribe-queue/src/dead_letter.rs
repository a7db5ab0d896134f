use serde::{Deserialize, Serialize};

use crate::{
    classify::ErrorCategory,
    job::{EmailJobData, JobId, StoredJob, now_ms},
};

/// A job that will not be retried automatically
///
/// Kept until an operator retries or purges it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job_id: JobId,
    pub data: EmailJobData,
    pub category: ErrorCategory,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Retryable failures consumed before giving up
    pub attempts_made: u32,
    /// Milliseconds since the Unix epoch
    pub failed_at: u64,
}

impl DeadLetterEntry {
    pub fn from_job(
        job: StoredJob,
        category: ErrorCategory,
        error_message: impl Into<String>,
        status_code: Option<u16>,
        attempts_made: u32,
    ) -> Self {
        Self {
            job_id: job.id,
            data: job.data,
            category,
            error_message: error_message.into(),
            status_code,
            attempts_made,
            failed_at: now_ms(),
        }
    }

    /// Payload for a fresh job carrying the original message
    ///
    /// The original id and attempt stamp are cleared so the new job gets a
    /// generated id and starts from zero.
    #[must_use]
    pub fn into_retry_payload(self) -> EmailJobData {
        EmailJobData {
            job_id: None,
            attempt_number: None,
            ..self.data
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_payload_drops_identity() {
        let mut data = EmailJobData::new("a@b", "s", "h").with_job_id("fixed");
        data.attempt_number = Some(3);
        let entry = DeadLetterEntry::from_job(
            StoredJob::new(data),
            ErrorCategory::Unknown,
            "boom",
            None,
            5,
        );
        assert_eq!(entry.job_id.as_str(), "fixed");

        let payload = entry.into_retry_payload();
        assert_eq!(payload.job_id, None);
        assert_eq!(payload.attempt_number, None);
        assert_eq!(payload.email.to, "a@b");
    }
}
