use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{NirbhayError, Result};
use crate::geo;

/// Unique identifier for a trip.
pub type TripId = Uuid;

/// Maximum number of guardians a trip may carry.
pub const MAX_GUARDIANS: usize = 3;

// ── Trip ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TripStatus {
    #[default]
    Active,
    Ended,
    Alert,
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Alert => "alert",
        })
    }
}

/// A trusted contact who receives the alert message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guardian {
    pub phone: String,
    /// Push token for the guardian's device, when they run the companion app.
    #[serde(default)]
    pub push_token: Option<String>,
}

/// Ordered guardian contacts: 1–3 entries, the first is the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Guardian>", into = "Vec<Guardian>")]
pub struct Guardians(Vec<Guardian>);

impl Guardians {
    /// Build from the wire form: a required primary phone and up to two extras.
    pub fn from_phones(
        primary: Option<&str>,
        secondary: Option<&str>,
        tertiary: Option<&str>,
        push_token: Option<&str>,
    ) -> Result<Self> {
        let primary = primary
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| NirbhayError::InvalidGuardians("primary guardian phone is required".into()))?;

        let mut list = vec![Guardian {
            phone: primary.to_string(),
            push_token: push_token.map(str::to_string),
        }];
        for phone in [secondary, tertiary].into_iter().flatten() {
            let phone = phone.trim();
            if !phone.is_empty() {
                list.push(Guardian {
                    phone: phone.to_string(),
                    push_token: None,
                });
            }
        }
        Self::try_from(list)
    }

    pub fn primary(&self) -> &Guardian {
        &self.0[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Guardian> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replace contacts position by position. `None` keeps the current entry.
    pub fn update(
        &mut self,
        primary: Option<&str>,
        secondary: Option<&str>,
        tertiary: Option<&str>,
        push_token: Option<&str>,
    ) -> Result<()> {
        let current = |i: usize| self.0.get(i).map(|g| g.phone.as_str());
        let primary = primary.or(current(0));
        let secondary = secondary.or(current(1));
        let tertiary = tertiary.or(current(2));
        let token = push_token.or(self.0[0].push_token.as_deref());
        let updated = Self::from_phones(primary, secondary, tertiary, token)?;
        *self = updated;
        Ok(())
    }
}

impl TryFrom<Vec<Guardian>> for Guardians {
    type Error = NirbhayError;

    fn try_from(list: Vec<Guardian>) -> Result<Self> {
        if list.is_empty() {
            return Err(NirbhayError::InvalidGuardians("at least one guardian is required".into()));
        }
        if list.len() > MAX_GUARDIANS {
            return Err(NirbhayError::InvalidGuardians(format!(
                "at most {MAX_GUARDIANS} guardians allowed, got {}",
                list.len()
            )));
        }
        for g in &list {
            if !is_plausible_phone(&g.phone) {
                return Err(NirbhayError::InvalidGuardians(format!("'{}' is not a phone number", g.phone)));
            }
        }
        Ok(Self(list))
    }
}

impl From<Guardians> for Vec<Guardian> {
    fn from(g: Guardians) -> Self {
        g.0
    }
}

fn is_plausible_phone(phone: &str) -> bool {
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    digits >= 7
        && phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'))
}

/// One monitored journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub user_id: String,
    pub status: TripStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub guardians: Guardians,
}

impl Trip {
    pub fn new(user_id: impl Into<String>, guardians: Guardians) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            status: TripStatus::Active,
            start_time: Utc::now(),
            end_time: None,
            guardians,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TripStatus::Active
    }

    /// Close the trip normally. No-op if it already terminated.
    pub fn end(&mut self) {
        if self.end_time.is_none() {
            self.status = TripStatus::Ended;
            self.end_time = Some(Utc::now());
        }
    }

    /// Close the trip after an alert was dispatched.
    pub fn mark_alert(&mut self) {
        self.status = TripStatus::Alert;
        if self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
    }
}

// ── Location ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    Gps,
    #[serde(alias = "cellular_unwiredlabs", alias = "cellular")]
    Fallback,
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gps => "gps",
            Self::Fallback => "fallback",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    pub id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of uncertainty in meters.
    pub accuracy: f64,
    pub source: LocationSource,
    pub timestamp: DateTime<Utc>,
}

impl LocationPoint {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, source: LocationSource) -> Self {
        Self::at(latitude, longitude, accuracy, source, Utc::now())
    }

    pub fn at(
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        source: LocationSource,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            latitude,
            longitude,
            accuracy,
            source,
            timestamp,
        }
    }

    /// Great-circle distance to another point in meters.
    pub fn distance_to(&self, other: &LocationPoint) -> f64 {
        geo::haversine_m(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Link for alert messages.
    pub fn map_url(&self) -> String {
        format!("https://maps.google.com/?q={:.6},{:.6}", self.latitude, self.longitude)
    }
}

// ── Motion ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
}

/// A raw tri-axial reading from one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub kind: SensorKind,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: DateTime<Utc>,
}

impl MotionSample {
    pub fn new(kind: SensorKind, x: f64, y: f64, z: f64) -> Self {
        Self {
            kind,
            x,
            y,
            z,
            timestamp: Utc::now(),
        }
    }

    /// Euclidean norm of the three axes.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionState {
    #[default]
    Normal,
    Panic,
}

/// Output of one motion-evaluation tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionReading {
    pub accel_variance: f64,
    pub gyro_variance: f64,
    pub state: MotionState,
    /// True only on the tick where the state went from normal to panic.
    pub panic_onset: bool,
    pub timestamp: DateTime<Utc>,
}

impl MotionReading {
    pub fn is_panic(&self) -> bool {
        self.state == MotionState::Panic
    }
}

// ── Risk ───────────────────────────────────────────────────────

/// The closed set of risk rules, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskRuleId {
    PanicMovementAbnormalStop,
    PanicMovementNight,
    GpsLossCellularMovement,
    ProlongedStopUnusualLocation,
}

impl RiskRuleId {
    pub const ALL: [RiskRuleId; 4] = [
        Self::PanicMovementAbnormalStop,
        Self::PanicMovementNight,
        Self::GpsLossCellularMovement,
        Self::ProlongedStopUnusualLocation,
    ];

    pub fn confidence(&self) -> f64 {
        match self {
            Self::PanicMovementAbnormalStop => 0.70,
            Self::PanicMovementNight => 0.65,
            Self::GpsLossCellularMovement => 0.50,
            Self::ProlongedStopUnusualLocation => 0.55,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PanicMovementAbnormalStop => "PANIC_MOVEMENT_ABNORMAL_STOP",
            Self::PanicMovementNight => "PANIC_MOVEMENT_NIGHT",
            Self::GpsLossCellularMovement => "GPS_LOSS_CELLULAR_MOVEMENT",
            Self::ProlongedStopUnusualLocation => "PROLONGED_STOP_UNUSUAL_LOCATION",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::PanicMovementAbnormalStop => "Panic movement followed by a sudden stop",
            Self::PanicMovementNight => "Panic movement during night hours",
            Self::GpsLossCellularMovement => "GPS lost, movement continues on fallback positioning",
            Self::ProlongedStopUnusualLocation => "Extended stop after significant movement",
        }
    }
}

impl fmt::Display for RiskRuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected risk. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub id: Uuid,
    pub rule: RiskRuleId,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub contributing_signals: Vec<String>,
    pub last_known_location: Option<LocationPoint>,
    pub motion: Option<MotionReading>,
}

impl RiskEvent {
    pub fn new(rule: RiskRuleId, signals: &[&str], timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule,
            confidence: rule.confidence(),
            timestamp,
            contributing_signals: signals.iter().map(|s| s.to_string()).collect(),
            last_known_location: None,
            motion: None,
        }
    }

    pub fn with_location(mut self, location: Option<LocationPoint>) -> Self {
        self.last_known_location = location;
        self
    }

    pub fn with_motion(mut self, motion: Option<MotionReading>) -> Self {
        self.motion = motion;
        self
    }
}
