//! Shared building blocks for the Tribe mail service
//!
//! - [`email`]: the contract between the delivery queue and an email provider
//! - [`address`]: recipient address checks applied before a job is accepted
//! - [`logging`]: tracing subscriber setup and the `internal!`/`outgoing!` macros

pub mod address;
pub mod email;
pub mod error;
pub mod logging;

pub use email::{EmailDeliveryResult, EmailOptions, EmailSender};
pub use error::{AddressError, SendError};
pub use tracing;

/// Lifecycle signal broadcast to long-running tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop accepting work and wind down
    Shutdown,
    /// Everything has been torn down
    Finalised,
}
