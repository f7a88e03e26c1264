//! # nirbhay-alerts
//!
//! Formats a location-bearing alert and hands it to push and SMS gateways.
//! Each channel is tried once per guardian; failures are logged and reported,
//! never retried, and never surface as errors to the caller.

pub mod dispatcher;
pub mod gateway;
pub mod message;

pub use dispatcher::{AlertDispatcher, DispatchReport, GatewayDispatcher};
pub use gateway::{
    Fast2SmsGateway, FcmPushGateway, PushGateway, SimulatedDelivery, SimulatedGateway, SmsGateway,
};
pub use message::{Alert, TEST_ALERT_LABEL, normalize_phone};
