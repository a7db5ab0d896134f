//! Wire types for `POST /v3/mail/send`

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tribe_common::EmailOptions;

#[derive(Debug, Serialize)]
pub struct MailSend<'a> {
    pub personalizations: [Personalization<'a>; 1],
    pub from: Address<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Address<'a>>,
    pub subject: &'a str,
    pub content: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_args: Option<&'a HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct Personalization<'a> {
    pub to: [Address<'a>; 1],
}

#[derive(Debug, Serialize)]
pub struct Address<'a> {
    pub email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct Content<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub value: &'a str,
}

impl<'a> MailSend<'a> {
    /// Build the request body; `default_from` fills in a missing sender
    pub fn new(
        options: &'a EmailOptions,
        default_from: &'a str,
        default_name: Option<&'a str>,
    ) -> Self {
        let from = match options.from.as_deref().filter(|f| !f.trim().is_empty()) {
            Some(email) => Address {
                email,
                name: options.from_name.as_deref(),
            },
            None => Address {
                email: default_from,
                name: options.from_name.as_deref().or(default_name),
            },
        };

        // text/plain has to precede text/html
        let mut content = Vec::with_capacity(2);
        if !options.text.is_empty() {
            content.push(Content {
                kind: "text/plain",
                value: &options.text,
            });
        }
        if !options.html.is_empty() {
            content.push(Content {
                kind: "text/html",
                value: &options.html,
            });
        }

        Self {
            personalizations: [Personalization {
                to: [Address {
                    email: &options.to,
                    name: None,
                }],
            }],
            from,
            reply_to: options
                .reply_to
                .as_deref()
                .map(|email| Address { email, name: None }),
            subject: &options.subject,
            content,
            categories: Some(options.categories.as_slice()).filter(|c| !c.is_empty()),
            custom_args: Some(&options.custom_args).filter(|a| !a.is_empty()),
        }
    }
}

/// Error body returned with 4xx/5xx responses
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorItem {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
}
