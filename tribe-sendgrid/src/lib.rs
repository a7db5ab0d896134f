//! SendGrid provider
//!
//! Implements [`EmailSender`](tribe_common::EmailSender) on top of the
//! SendGrid v3 `mail/send` endpoint.

pub mod config;
mod payload;
pub mod sender;

pub use config::SendGridConfig;
pub use sender::SendGridSender;
