//! HTTP client for the backend under `/api`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use nirbhay_alerts::{Alert, AlertDispatcher, DispatchReport};
use nirbhay_core::api::{
    AlertRequest, CreateTripRequest, GuardianUpdate, GuardianUpdated, HealthResponse, LocationAccepted,
    LocationSubmission, MotionAccepted, MotionSubmission, TripCreated, TripEndedResponse,
};
use nirbhay_core::{LocationPoint, MotionReading, NirbhayError, Result, Trip, TripId};

use crate::telemetry::TelemetryPort;

/// Talks to a Nirbhay backend.
///
/// Local trip ids are mapped to the ids the backend assigned, so telemetry for
/// a trip the backend never registered is refused instead of sent blind.
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    remote_ids: DashMap<TripId, Uuid>,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            remote_ids: DashMap::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Backend id for a local trip, once registered.
    pub fn remote_id(&self, trip_id: TripId) -> Option<Uuid> {
        self.remote_ids.get(&trip_id).map(|id| *id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn trip_url(&self, trip_id: TripId, suffix: &str) -> Result<String> {
        let remote = self
            .remote_id(trip_id)
            .ok_or_else(|| NirbhayError::Telemetry(format!("trip {trip_id} not registered with backend")))?;
        Ok(self.url(&format!("/trips/{remote}{suffix}")))
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NirbhayError::Backend {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| NirbhayError::Telemetry(format!("invalid backend response: {e}")))
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, url: String, body: &B) -> Result<T> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| NirbhayError::Telemetry(e.to_string()))?;
        Self::read(resp).await
    }

    pub async fn create_trip(&self, trip: &Trip) -> Result<TripCreated> {
        let body = CreateTripRequest::from_guardians(&trip.user_id, &trip.guardians);
        let created: TripCreated = self.post(self.url("/trips"), &body).await?;
        self.remote_ids.insert(trip.id, created.trip_id);
        debug!(trip_id = %trip.id, remote_id = %created.trip_id, "backend trip created");
        Ok(created)
    }

    pub async fn submit_location(&self, trip_id: TripId, point: &LocationPoint) -> Result<LocationAccepted> {
        let body = LocationSubmission {
            latitude: point.latitude,
            longitude: point.longitude,
            accuracy: point.accuracy,
            source: point.source,
        };
        self.post(self.trip_url(trip_id, "/location")?, &body).await
    }

    /// Submit a motion reading. A server verdict that disagrees with the
    /// device is logged and otherwise ignored.
    pub async fn submit_motion(&self, trip_id: TripId, reading: &MotionReading) -> Result<MotionAccepted> {
        let body = MotionSubmission {
            accel_variance: reading.accel_variance,
            gyro_variance: reading.gyro_variance,
        };
        let accepted: MotionAccepted = self.post(self.trip_url(trip_id, "/motion")?, &body).await?;
        if accepted.is_panic != reading.is_panic() {
            warn!(
                trip_id = %trip_id,
                device_panic = reading.is_panic(),
                server_panic = accepted.is_panic,
                "server motion verdict disagrees with device"
            );
        }
        Ok(accepted)
    }

    pub async fn end_trip(&self, trip_id: TripId) -> Result<TripEndedResponse> {
        let url = self.trip_url(trip_id, "/end")?;
        let ended = self.post(url, &serde_json::json!({})).await?;
        self.remote_ids.remove(&trip_id);
        Ok(ended)
    }

    pub async fn update_guardians(&self, trip_id: TripId, update: &GuardianUpdate) -> Result<GuardianUpdated> {
        let resp = self
            .client
            .put(self.trip_url(trip_id, "/guardian")?)
            .json(update)
            .send()
            .await
            .map_err(|e| NirbhayError::Telemetry(e.to_string()))?;
        Self::read(resp).await
    }

    /// Ask the backend to dispatch an alert on the trip's behalf.
    pub async fn trigger_alert(&self, trip_id: TripId, alert: &Alert) -> Result<DispatchReport> {
        let body = AlertRequest::new(&alert.label, alert.confidence, alert.location.as_ref());
        self.post(self.trip_url(trip_id, "/alert")?, &body).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let resp = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| NirbhayError::Telemetry(e.to_string()))?;
        Self::read(resp).await
    }
}

#[async_trait]
impl TelemetryPort for BackendClient {
    fn name(&self) -> &str {
        "backend"
    }

    async fn trip_started(&self, trip: &Trip) -> Result<()> {
        self.create_trip(trip).await.map(|_| ())
    }

    async fn location(&self, trip_id: TripId, point: &LocationPoint) -> Result<()> {
        self.submit_location(trip_id, point).await.map(|_| ())
    }

    async fn motion(&self, trip_id: TripId, reading: &MotionReading) -> Result<()> {
        self.submit_motion(trip_id, reading).await.map(|_| ())
    }

    async fn guardians_updated(&self, trip_id: TripId, update: &GuardianUpdate) -> Result<()> {
        self.update_guardians(trip_id, update).await.map(|_| ())
    }

    async fn trip_ended(&self, trip_id: TripId) -> Result<()> {
        self.end_trip(trip_id).await.map(|_| ())
    }
}

/// Dispatches through the backend's `/alert` endpoint instead of talking to
/// gateways from the device. When the backend cannot be reached, or never
/// registered the trip, the alert goes out through `fallback` instead.
pub struct BackendDispatcher {
    backend: Arc<BackendClient>,
    fallback: Arc<dyn AlertDispatcher>,
}

impl BackendDispatcher {
    pub fn new(backend: Arc<BackendClient>, fallback: Arc<dyn AlertDispatcher>) -> Self {
        Self { backend, fallback }
    }
}

#[async_trait]
impl AlertDispatcher for BackendDispatcher {
    async fn dispatch(&self, trip: &Trip, alert: &Alert) -> DispatchReport {
        match self.backend.trigger_alert(trip.id, alert).await {
            Ok(report) => report,
            Err(e) => {
                warn!(trip_id = %trip.id, error = %e, "backend alert failed, dispatching directly");
                self.fallback.dispatch(trip, alert).await
            }
        }
    }
}
