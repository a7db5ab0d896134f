//! Error types for the tribe-common crate.

use thiserror::Error;

/// Reasons a recipient address is refused before it reaches the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Nothing (or only whitespace) was supplied.
    #[error("Empty address")]
    Empty,

    /// Address exceeds 254 octets.
    #[error("Address exceeds {max} octets: {len}")]
    TooLong { len: usize, max: usize },

    /// No '@' separator.
    #[error("Missing '@' in address: {0}")]
    MissingAtSign(String),

    /// Nothing before the first '@'.
    #[error("Missing local part in address: {0}")]
    MissingLocalPart(String),

    /// Nothing after the last '@'.
    #[error("Missing domain in address: {0}")]
    MissingDomain(String),

    /// Whitespace or control characters inside the address.
    #[error("Invalid character in address: {0}")]
    InvalidCharacter(String),
}

/// Failure raised by an [`EmailSender`](crate::EmailSender) instead of a
/// delivery result.
///
/// Ordinary rejections from the provider are reported through
/// [`EmailDeliveryResult`](crate::EmailDeliveryResult) with `success: false`;
/// this type is for the cases where no provider answer exists at all.
#[derive(Debug, Error)]
pub enum SendError {
    /// The request never completed within the configured timeout.
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// The provider could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The sender is misconfigured (missing API key, bad URL, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl SendError {
    /// Returns `true` if the failure was a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
