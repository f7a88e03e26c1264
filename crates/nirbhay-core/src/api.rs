//! JSON bodies exchanged with the backend under `/api`.
//!
//! Shared by the server handlers and the device-side backend client so the
//! two cannot drift apart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Guardians, LocationPoint, LocationSource, TripStatus};

fn default_user() -> String {
    "default_user".into()
}

/// `POST /api/trips`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTripRequest {
    #[serde(default = "default_user")]
    pub user_id: String,
    #[serde(default)]
    pub guardian_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_phone_2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_phone_3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_fcm_token: Option<String>,
}

impl CreateTripRequest {
    pub fn from_guardians(user_id: &str, guardians: &Guardians) -> Self {
        let mut phones = guardians.iter().map(|g| g.phone.clone());
        Self {
            user_id: user_id.to_string(),
            guardian_phone: phones.next(),
            guardian_phone_2: phones.next(),
            guardian_phone_3: phones.next(),
            guardian_fcm_token: guardians.primary().push_token.clone(),
        }
    }

    pub fn guardians(&self) -> crate::Result<Guardians> {
        Guardians::from_phones(
            self.guardian_phone.as_deref(),
            self.guardian_phone_2.as_deref(),
            self.guardian_phone_3.as_deref(),
            self.guardian_fcm_token.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripCreated {
    pub trip_id: Uuid,
    pub user_id: String,
    pub status: TripStatus,
    pub start_time: DateTime<Utc>,
    pub guardian_count: usize,
}

/// `POST /api/trips/{id}/location`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSubmission {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub source: LocationSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationAccepted {
    pub message: String,
    pub location_id: Uuid,
}

/// `POST /api/trips/{id}/motion`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotionSubmission {
    pub accel_variance: f64,
    pub gyro_variance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionAccepted {
    pub message: String,
    pub motion_id: Uuid,
    /// Server-side verdict. Advisory only.
    pub is_panic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripEndedResponse {
    pub message: String,
    pub trip_id: Uuid,
    pub end_time: Option<DateTime<Utc>>,
}

/// `PUT /api/trips/{id}/guardian`. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardianUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_phone_2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_phone_3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_fcm_token: Option<String>,
}

impl GuardianUpdate {
    pub fn apply(&self, guardians: &mut Guardians) -> crate::Result<()> {
        guardians.update(
            self.guardian_phone.as_deref(),
            self.guardian_phone_2.as_deref(),
            self.guardian_phone_3.as_deref(),
            self.guardian_fcm_token.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianUpdated {
    pub message: String,
    pub trip_id: Uuid,
}

/// `POST /api/trips/{id}/alert`. Every field optional.
///
/// A device that knows where it is sends its position along, since the
/// backend's last stored point may be stale or missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<LocationSource>,
}

impl AlertRequest {
    pub fn new(rule: &str, confidence: f64, location: Option<&LocationPoint>) -> Self {
        Self {
            rule: Some(rule.to_string()),
            confidence: Some(confidence),
            latitude: location.map(|p| p.latitude),
            longitude: location.map(|p| p.longitude),
            accuracy: location.map(|p| p.accuracy),
            source: location.map(|p| p.source),
        }
    }

    /// Position carried with the request.
    ///
    /// `None` unless both coordinates are present and in range. Without an
    /// accuracy the point is treated as a 100 m fallback estimate.
    pub fn location(&self) -> Option<LocationPoint> {
        let (latitude, longitude) = (self.latitude?, self.longitude?);
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        let accuracy = self
            .accuracy
            .filter(|a| a.is_finite() && *a >= 0.0)
            .unwrap_or(100.0);
        let source = self.source.unwrap_or(LocationSource::Fallback);
        Some(LocationPoint::new(latitude, longitude, accuracy, source))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestAlertResponse {
    pub message: String,
    pub push_sent: bool,
    pub sms_sent: bool,
    pub guardian_phone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskEvaluation {
    pub risk_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contributing_signals: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTrip {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub status: TripStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub storage: String,
    pub sms: String,
    pub push: String,
    pub geolocation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub services: ServiceStatus,
}

/// Error body returned by every failing handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
