//! # nirbhay-runtime
//!
//! Runs one trip. [`TripMonitor`] is the actor that owns the trip's sensing,
//! risk evaluation and escalation; [`Telemetry`] reports progress to a backend
//! without ever holding the actor up.

pub mod backend;
pub mod monitor;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use nirbhay_alerts::{AlertDispatcher, GatewayDispatcher};
use nirbhay_config::NirbhayConfig;

pub use backend::{BackendClient, BackendDispatcher};
pub use monitor::{MonitorDeps, TripHandle, TripMonitor, TripSnapshot};
pub use telemetry::{NullTelemetry, Telemetry, TelemetryPort};

/// Pick telemetry and alert delivery for a device runtime.
///
/// With a backend URL configured, trips are mirrored to the backend and alerts
/// go through its `/alert` endpoint, falling back to the gateways when the
/// backend call fails. Without one, nothing is reported and alerts go straight
/// to the gateways (simulated when keys are missing).
pub fn connect(config: &NirbhayConfig) -> (Telemetry, Arc<dyn AlertDispatcher>) {
    let timeout = Duration::from_secs(config.services.telemetry_timeout_secs.max(1));
    let direct = GatewayDispatcher::from_config(config);
    info!(
        sms = direct.sms_gateway(),
        push = direct.push_gateway(),
        "gateways for direct alerting"
    );
    let direct: Arc<dyn AlertDispatcher> = Arc::new(direct);
    match config.services.backend_url.as_deref() {
        Some(url) => {
            info!(backend = url, "reporting to backend");
            let client = Arc::new(BackendClient::new(url, timeout));
            let telemetry = Telemetry::new(client.clone(), timeout);
            (telemetry, Arc::new(BackendDispatcher::new(client, direct)))
        }
        None => {
            info!("no backend configured, alerting directly");
            (Telemetry::disabled(), direct)
        }
    }
}
