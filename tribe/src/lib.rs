pub mod config;
pub mod control_handler;
pub mod controller;

pub use config::{ConfigError, TribeConfig};
pub use control_handler::TribeControlHandler;
pub use controller::Tribe;
