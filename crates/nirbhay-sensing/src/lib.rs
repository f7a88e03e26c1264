//! # nirbhay-sensing
//!
//! The sensing edge of a trip: rolling-window motion classification, GPS
//! versus fallback location selection, and the provider capability that
//! delivers raw samples from a device or a simulation.

pub mod location;
pub mod motion;
pub mod provider;

pub use location::{LocationManager, classify_source};
pub use motion::{MIN_SAMPLES, MotionProcessor, RingBuffer, classify, variance};
pub use provider::{
    ExternalFeedProvider, FeedHandle, Permissions, ProviderFix, Scenario, SensorProvider, SensorStreams,
    SimulatedProvider, SimulationSettings,
};
