//! Control protocol for a running Tribe mail daemon
//!
//! Operators inspect the queue, redrive or purge dead-lettered jobs and
//! override the circuit breaker over a Unix domain socket. Frames are a
//! 4-byte big-endian length followed by a bincode body.

pub mod client;
pub mod error;
mod frame;
pub mod protocol;
pub mod server;

pub use client::ControlClient;
pub use error::{ControlError, Result};
pub use protocol::{
    CircuitCommand, CircuitSummary, DeadLetterSummary, EmailRequest, JobSummary, PROTOCOL_VERSION,
    QueueCommand, QueueSummary, Request, RequestCommand, Response, ResponseData, ResponsePayload,
    SystemCommand, SystemStatus,
};
pub use server::{CommandHandler, ControlServer};

/// Default path for the control socket
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/tribe.sock";
