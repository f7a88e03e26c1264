//! # nirbhay-config
//!
//! Configuration system for the Nirbhay pipeline. Reads from `nirbhay.toml` and
//! environment variables, in that precedence order for thresholds, with the
//! environment acting as fallback for gateway keys.
//!
//! Supports hot-reload via filesystem watcher. The server reads the shared
//! config on every request; a running trip monitor keeps the snapshot it
//! started with.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::NirbhayConfig;
pub use schema::{
    AlertsConfig, ConfigWarning, EscalationConfig, LocationConfig, LoggingConfig, MotionConfig,
    RiskConfig, ServerConfig, ServicesConfig, WarningSeverity,
};
