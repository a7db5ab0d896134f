use std::{fmt, time::Duration};

use serde::Deserialize;

const fn default_timeout_secs() -> u64 {
    30
}

fn default_base_url() -> String {
    "https://api.sendgrid.com".to_string()
}

/// SendGrid account settings
///
/// ```ron
/// sendgrid: (
///     api_key: "SG.xxxx",
///     from_email: "noreply@example.com",
///     from_name: Some("Tribe"),
/// )
/// ```
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct SendGridConfig {
    #[serde(default)]
    pub api_key: String,

    /// Default sender address, used when a message has no `from`
    #[serde(default)]
    pub from_email: String,

    #[serde(default)]
    pub from_name: Option<String>,

    /// API root; overridable for tests and regional endpoints
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Whole-request timeout, including reading the response
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SendGridConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            from_email: String::new(),
            from_name: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for SendGridConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendGridConfig")
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("from_email", &self.from_email)
            .field("from_name", &self.from_name)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl SendGridConfig {
    /// Apply `SENDGRID_API_KEY`, `SENDGRID_FROM_EMAIL` and
    /// `SENDGRID_FROM_NAME` from `lookup`
    #[must_use]
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("SENDGRID_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.api_key = key.trim().to_string();
        }
        if let Some(from) = lookup("SENDGRID_FROM_EMAIL").filter(|v| !v.trim().is_empty()) {
            self.from_email = from.trim().to_string();
        }
        if let Some(name) = lookup("SENDGRID_FROM_NAME").filter(|v| !v.trim().is_empty()) {
            self.from_name = Some(name);
        }
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Full URL of the mail send endpoint
    #[must_use]
    pub fn send_url(&self) -> String {
        format!("{}/v3/mail/send", self.base_url.trim_end_matches('/'))
    }
}
