//! # nirbhay-cli
//!
//! Command-line interface for the Nirbhay safety pipeline.
//!
//! ## Commands
//!
//! - `nirbhay serve` runs the HTTP backend
//! - `nirbhay simulate` drives one simulated trip and prints its events
//! - `nirbhay config` shows the effective configuration
//! - `nirbhay doctor` validates configuration and gateway readiness

pub mod commands;

pub use commands::Cli;
