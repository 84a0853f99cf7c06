//! Startup: configuration loading and logging bootstrap

pub mod config;
pub mod logging;

pub use self::config::{GatewaySettings, LogSettings, Settings};
pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
