use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use nirbhay_core::api::GuardianUpdate;
use nirbhay_core::{LocationPoint, MotionReading, Result, Trip, TripId};

/// Outbound reporting of trip progress to a backend.
#[async_trait]
pub trait TelemetryPort: Send + Sync {
    fn name(&self) -> &str;

    async fn trip_started(&self, trip: &Trip) -> Result<()>;

    async fn location(&self, trip_id: TripId, point: &LocationPoint) -> Result<()>;

    async fn motion(&self, trip_id: TripId, reading: &MotionReading) -> Result<()>;

    async fn guardians_updated(&self, trip_id: TripId, update: &GuardianUpdate) -> Result<()>;

    async fn trip_ended(&self, trip_id: TripId) -> Result<()>;
}

/// Reports nowhere. Used when no backend is configured.
pub struct NullTelemetry;

#[async_trait]
impl TelemetryPort for NullTelemetry {
    fn name(&self) -> &str {
        "none"
    }

    async fn trip_started(&self, _trip: &Trip) -> Result<()> {
        Ok(())
    }

    async fn location(&self, _trip_id: TripId, _point: &LocationPoint) -> Result<()> {
        Ok(())
    }

    async fn motion(&self, _trip_id: TripId, _reading: &MotionReading) -> Result<()> {
        Ok(())
    }

    async fn guardians_updated(&self, _trip_id: TripId, _update: &GuardianUpdate) -> Result<()> {
        Ok(())
    }

    async fn trip_ended(&self, _trip_id: TripId) -> Result<()> {
        Ok(())
    }
}

/// Fire-and-forget front for a [`TelemetryPort`].
///
/// Every call runs in its own task under a timeout. Failures are logged and
/// dropped, nothing is retried, and the caller never waits.
#[derive(Clone)]
pub struct Telemetry {
    port: Arc<dyn TelemetryPort>,
    timeout: Duration,
}

impl Telemetry {
    pub fn new(port: Arc<dyn TelemetryPort>, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NullTelemetry), Duration::from_secs(1))
    }

    pub fn port_name(&self) -> &str {
        self.port.name()
    }

    /// Register the trip. Awaited once before monitoring starts, still bounded
    /// by the timeout and never fatal.
    pub async fn trip_started(&self, trip: &Trip) {
        match tokio::time::timeout(self.timeout, self.port.trip_started(trip)).await {
            Ok(Ok(())) => debug!(trip_id = %trip.id, "trip registered with backend"),
            Ok(Err(e)) => warn!(trip_id = %trip.id, error = %e, "trip registration failed"),
            Err(_) => warn!(trip_id = %trip.id, "trip registration timed out"),
        }
    }

    pub fn location(&self, trip_id: TripId, point: LocationPoint) {
        let port = Arc::clone(&self.port);
        self.spawn("location", trip_id, async move { port.location(trip_id, &point).await });
    }

    pub fn motion(&self, trip_id: TripId, reading: MotionReading) {
        let port = Arc::clone(&self.port);
        self.spawn("motion", trip_id, async move { port.motion(trip_id, &reading).await });
    }

    pub fn guardians_updated(&self, trip_id: TripId, update: GuardianUpdate) {
        let port = Arc::clone(&self.port);
        self.spawn("guardians", trip_id, async move { port.guardians_updated(trip_id, &update).await });
    }

    pub fn trip_ended(&self, trip_id: TripId) {
        let port = Arc::clone(&self.port);
        self.spawn("end", trip_id, async move { port.trip_ended(trip_id).await });
    }

    fn spawn(&self, call: &'static str, trip_id: TripId, fut: impl Future<Output = Result<()>> + Send + 'static) {
        let timeout = self.timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, fut).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(call, trip_id = %trip_id, error = %e, "telemetry failed"),
                Err(_) => warn!(call, trip_id = %trip_id, "telemetry timed out"),
            }
        });
    }
}
