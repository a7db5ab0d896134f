use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::HeaderMap};
use tracing::warn;
use tribe_common::{EmailDeliveryResult, EmailOptions, EmailSender, SendError, outgoing};

use crate::{
    config::SendGridConfig,
    payload::{ErrorBody, MailSend},
};

const MESSAGE_ID_HEADER: &str = "x-message-id";

/// [`EmailSender`] backed by the SendGrid v3 API
#[derive(Debug, Clone)]
pub struct SendGridSender {
    client: Client,
    config: SendGridConfig,
    url: String,
}

impl SendGridSender {
    /// Build a sender; fails if the API key or default sender is missing
    pub fn new(config: SendGridConfig) -> Result<Self, SendError> {
        if config.api_key.trim().is_empty() {
            return Err(SendError::Configuration(
                "SendGrid API key is not configured (SENDGRID_API_KEY)".to_string(),
            ));
        }
        if config.from_email.trim().is_empty() {
            return Err(SendError::Configuration(
                "SendGrid sender address is not configured (SENDGRID_FROM_EMAIL)".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SendError::Configuration(format!("HTTP client error: {e}")))?;

        Ok(Self {
            client,
            url: config.send_url(),
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SendGridConfig {
        &self.config
    }
}

fn transport_error(err: &reqwest::Error) -> SendError {
    if err.is_timeout() {
        SendError::Timeout(err.to_string())
    } else if err.is_connect() {
        SendError::Connection(err.to_string())
    } else {
        SendError::Other(format!("SendGrid request failed: {err}"))
    }
}

fn message_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MESSAGE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Turn a non-2xx response body into a rejection
fn rejection(status: StatusCode, body: &str) -> EmailDeliveryResult {
    let first = serde_json::from_str::<ErrorBody>(body)
        .unwrap_or_default()
        .errors
        .into_iter()
        .next();

    let (message, field) = first.map_or((None, None), |item| (item.message, item.field));
    let message = message.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("SendGrid request failed")
            .to_string()
    });

    let result = EmailDeliveryResult::rejected(Some(status.as_u16()), message);
    match field {
        Some(field) => result.with_field(field),
        None => result,
    }
}

#[async_trait]
impl EmailSender for SendGridSender {
    async fn send(&self, options: &EmailOptions) -> Result<EmailDeliveryResult, SendError> {
        let body = MailSend::new(
            options,
            &self.config.from_email,
            self.config.from_name.as_deref(),
        );

        outgoing!(level = DEBUG, url = %self.url, "POST mail/send");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if status.is_success() {
            let id = message_id(response.headers());
            outgoing!(
                level = DEBUG,
                %status,
                message_id = id.as_deref().unwrap_or_default(),
                "SendGrid accepted message"
            );
            return Ok(EmailDeliveryResult::delivered(id));
        }

        let text = response.text().await.unwrap_or_default();
        let result = rejection(status, &text);

        warn!(
            %status,
            error = result.error.as_deref().unwrap_or_default(),
            field = result.error_field.as_deref().unwrap_or_default(),
            "SendGrid rejected message"
        );

        Ok(result)
    }
}
