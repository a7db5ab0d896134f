//! Provider failure classification.
//!
//! Every failed attempt is reduced to a [`ProviderFailure`] and mapped to an
//! [`ErrorCategory`]. The category alone decides whether the job is retried
//! or moved to the dead-letter store. Rules are checked in order and the
//! first match wins:
//!
//! | Rule                                                      | Category             | Retry |
//! |-----------------------------------------------------------|----------------------|-------|
//! | status 429, "rate limit", "too many requests"             | `RateLimit`          | yes   |
//! | status 500, 502, 503, 504                                 | `ServiceUnavailable` | yes   |
//! | "timeout", "etimedout", "timed out"                       | `Timeout`            | yes   |
//! | "blocked", "suppress", "blocklist"                        | `Blocked`            | no    |
//! | "does not exist", "bounce", "no such user", ...           | `Bounce`             | no    |
//! | "spam"                                                    | `Spam`               | no    |
//! | status 400, malformed address text, field `to`/`from`     | `InvalidEmail`       | no    |
//! | anything else                                             | `Unknown`            | yes   |

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category a failed attempt falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimit,
    Timeout,
    ServiceUnavailable,
    InvalidEmail,
    Blocked,
    Bounce,
    Spam,
    Unknown,
}

impl ErrorCategory {
    /// Whether a job failing this way should be attempted again.
    ///
    /// `Unknown` retries: an unrecognised failure is assumed transient.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Timeout | Self::ServiceUnavailable | Self::Unknown
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InvalidEmail => "invalid_email",
            Self::Blocked => "blocked",
            Self::Bounce => "bounce",
            Self::Spam => "spam",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is known about a failed attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderFailure {
    pub status_code: Option<u16>,
    pub message: String,
    /// Request field the provider blamed, such as `personalizations.0.to`
    pub field: Option<String>,
}

impl ProviderFailure {
    pub fn new(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            field: None,
        }
    }

    #[must_use]
    pub fn with_field(mut self, field: Option<String>) -> Self {
        self.field = field;
        self
    }
}

/// A classification function; swap it to match another provider's errors
pub type Classifier = fn(&ProviderFailure) -> ErrorCategory;

const RATE_LIMIT: &[&str] = &["rate limit", "too many requests"];
const TIMEOUT: &[&str] = &["timeout", "etimedout", "timed out"];
const BLOCKED: &[&str] = &["blocked", "suppress", "blocklist"];
const BOUNCE: &[&str] = &[
    "does not exist",
    "bounce",
    "no such user",
    "user unknown",
    "mailbox unavailable",
];
const SPAM: &[&str] = &["spam"];
const INVALID: &[&str] = &[
    "invalid email",
    "invalid address",
    "malformed",
    "valid address",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// The field path names the recipient or sender, e.g. `personalizations.0.to`
fn is_address_field(field: &str) -> bool {
    field
        .split('.')
        .any(|segment| segment.eq_ignore_ascii_case("to") || segment.eq_ignore_ascii_case("from"))
}

/// Default classifier, tuned to SendGrid responses
pub fn classify(failure: &ProviderFailure) -> ErrorCategory {
    let message = failure.message.to_lowercase();
    let status = failure.status_code;

    if status == Some(429) || contains_any(&message, RATE_LIMIT) {
        return ErrorCategory::RateLimit;
    }

    if matches!(status, Some(500 | 502 | 503 | 504)) {
        return ErrorCategory::ServiceUnavailable;
    }

    if contains_any(&message, TIMEOUT) {
        return ErrorCategory::Timeout;
    }

    if contains_any(&message, BLOCKED) {
        return ErrorCategory::Blocked;
    }

    if contains_any(&message, BOUNCE) {
        return ErrorCategory::Bounce;
    }

    if contains_any(&message, SPAM) {
        return ErrorCategory::Spam;
    }

    if status == Some(400)
        || contains_any(&message, INVALID)
        || failure.field.as_deref().is_some_and(is_address_field)
    {
        return ErrorCategory::InvalidEmail;
    }

    ErrorCategory::Unknown
}
