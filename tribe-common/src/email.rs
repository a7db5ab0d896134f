use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SendError;

/// Everything a provider needs to deliver one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailOptions {
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub subject: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_args: HashMap<String, String>,
}

/// Outcome of a provider call that returned an answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailDeliveryResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Request field the provider blamed, for example `personalizations.0.to`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_field: Option<String>,
}

impl EmailDeliveryResult {
    /// A successful delivery with an optional provider message id.
    pub fn delivered(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            ..Self::default()
        }
    }

    /// A rejection reported by the provider.
    pub fn rejected(status_code: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            status_code,
            ..Self::default()
        }
    }

    /// Attach the request field the provider blamed.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.error_field = Some(field.into());
        self
    }
}

/// A transactional email provider.
///
/// Implementations report provider rejections as `Ok` with `success: false`
/// and reserve `Err` for failures where the provider never answered.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, options: &EmailOptions) -> Result<EmailDeliveryResult, SendError>;
}

#[async_trait]
impl<T: EmailSender + ?Sized> EmailSender for std::sync::Arc<T> {
    async fn send(&self, options: &EmailOptions) -> Result<EmailDeliveryResult, SendError> {
        (**self).send(options).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_options_json_omits_empty_fields() {
        let options = EmailOptions {
            to: "aunt@example.com".to_string(),
            subject: "New photo".to_string(),
            html: "<p>Hi</p>".to_string(),
            ..EmailOptions::default()
        };

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "to": "aunt@example.com",
                "subject": "New photo",
                "html": "<p>Hi</p>",
                "text": "",
            })
        );
    }

    #[test]
    fn test_result_constructors() {
        let ok = EmailDeliveryResult::delivered(Some("msg-1".to_string()));
        assert!(ok.success);
        assert_eq!(ok.message_id.as_deref(), Some("msg-1"));

        let rejected = EmailDeliveryResult::rejected(Some(400), "invalid email")
            .with_field("personalizations.0.to");
        assert!(!rejected.success);
        assert_eq!(rejected.status_code, Some(400));
        assert_eq!(rejected.error_field.as_deref(), Some("personalizations.0.to"));
    }

    struct Echo;

    #[async_trait]
    impl EmailSender for Echo {
        async fn send(&self, options: &EmailOptions) -> Result<EmailDeliveryResult, SendError> {
            Ok(EmailDeliveryResult::delivered(Some(options.to.clone())))
        }
    }

    #[tokio::test]
    async fn test_arc_sender_delegates() {
        let sender: std::sync::Arc<dyn EmailSender> = std::sync::Arc::new(Echo);
        let options = EmailOptions {
            to: "x@y".to_string(),
            ..EmailOptions::default()
        };
        let result = sender.send(&options).await.unwrap();
        assert_eq!(result.message_id.as_deref(), Some("x@y"));
    }
}
