//! # TAKRelay Core
//!
//! Configuration and error handling shared by the TAKRelay server crates.
//!
//! - **Configuration**: YAML files with environment variable overrides and validation.
//! - **Errors**: `thiserror` based error types for startup and configuration failures.

pub mod config;
pub mod error;

pub use config::{
    DeliveryMode, HomeConfig, LogFormat, LoggingConfig, PresenceSection, RelayConfig,
    RouterSection, ServerSection,
};
pub use error::{ConfigError, RelayError, Result};
