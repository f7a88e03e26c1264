//! # nirbhay-core
//!
//! Core types, error type, and primitives for the Nirbhay safety pipeline.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! trips and guardians, location points, motion samples and readings, risk events,
//! and the broadcast event bus the trip monitor publishes to.

pub mod api;
pub mod error;
pub mod event;
pub mod geo;
pub mod types;

pub use error::{NirbhayError, Result};
pub use event::{Event, EventBus};
pub use types::*;
