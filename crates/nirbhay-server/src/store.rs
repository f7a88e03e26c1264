//! In-process trip storage.

use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;
use serde::Serialize;

use nirbhay_core::api::ActiveTrip;
use nirbhay_core::{LocationPoint, MotionReading, NirbhayError, Result, RiskEvent, Trip, TripId, TripStatus};
use nirbhay_risk::{RiskEngine, RiskWindow};

/// Number of most recent motion events consulted for `/debug`'s motion status.
const DEBUG_MOTION_WINDOW: usize = 5;

/// A trip plus the telemetry received for it. Histories keep the most recent
/// `limit` entries.
#[derive(Debug, Clone, Serialize)]
pub struct TripRecord {
    #[serde(flatten)]
    pub trip: Trip,
    pub locations: Vec<LocationPoint>,
    pub motion_events: Vec<MotionReading>,
    pub risk_events: Vec<RiskEvent>,
    #[serde(skip)]
    limit: usize,
}

/// Body of `GET /api/trips/{id}/debug`.
#[derive(Debug, Clone, Serialize)]
pub struct TripDebug {
    pub trip_id: TripId,
    pub status: TripStatus,
    pub tracking_source: String,
    pub accuracy: f64,
    pub total_locations: usize,
    pub total_motion_events: usize,
    pub motion_status: &'static str,
    pub last_risk_rule: Option<String>,
    pub last_risk_confidence: Option<f64>,
    pub guardian_phone: String,
    pub last_location: Option<LocationPoint>,
}

fn push_bounded<T>(items: &mut Vec<T>, item: T, limit: usize) {
    items.push(item);
    let limit = limit.max(1);
    if items.len() > limit {
        let excess = items.len() - limit;
        items.drain(..excess);
    }
}

impl TripRecord {
    pub fn new(trip: Trip, limit: usize) -> Self {
        Self {
            trip,
            locations: Vec::new(),
            motion_events: Vec::new(),
            risk_events: Vec::new(),
            limit,
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.trip.is_active() {
            Ok(())
        } else {
            Err(NirbhayError::TripNotActive(self.trip.id))
        }
    }

    pub fn push_location(&mut self, point: LocationPoint) -> Result<()> {
        self.ensure_active()?;
        push_bounded(&mut self.locations, point, self.limit);
        Ok(())
    }

    pub fn push_motion(&mut self, reading: MotionReading) -> Result<()> {
        self.ensure_active()?;
        push_bounded(&mut self.motion_events, reading, self.limit);
        Ok(())
    }

    pub fn push_risk(&mut self, risk: RiskEvent) {
        push_bounded(&mut self.risk_events, risk, self.limit);
    }

    pub fn last_motion(&self) -> Option<&MotionReading> {
        self.motion_events.last()
    }

    /// Run the rule engine over this trip's history. Pure: nothing is recorded.
    pub fn evaluate(&self, engine: &RiskEngine, now: DateTime<FixedOffset>) -> Option<RiskEvent> {
        engine.evaluate(&RiskWindow::new(&self.motion_events, &self.locations, now))
    }

    pub fn debug(&self) -> TripDebug {
        let last = self.locations.last();
        let recent_panic = self
            .motion_events
            .iter()
            .rev()
            .take(DEBUG_MOTION_WINDOW)
            .any(MotionReading::is_panic);
        let last_risk = self.risk_events.last();
        TripDebug {
            trip_id: self.trip.id,
            status: self.trip.status,
            tracking_source: last.map_or_else(|| "none".to_string(), |p| p.source.to_string()),
            accuracy: last.map_or(0.0, |p| p.accuracy),
            total_locations: self.locations.len(),
            total_motion_events: self.motion_events.len(),
            motion_status: if recent_panic { "panic_detected" } else { "normal" },
            last_risk_rule: last_risk.map(|r| r.rule.to_string()),
            last_risk_confidence: last_risk.map(|r| r.confidence),
            guardian_phone: self.trip.guardians.primary().phone.clone(),
            last_location: last.cloned(),
        }
    }
}

/// All trips known to this server.
#[derive(Default)]
pub struct TripStore {
    trips: DashMap<TripId, TripRecord>,
}

impl TripStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, trip: Trip, history_limit: usize) -> TripId {
        let id = trip.id;
        self.trips.insert(id, TripRecord::new(trip, history_limit));
        id
    }

    /// Copy of a trip's record.
    pub fn get(&self, id: TripId) -> Result<TripRecord> {
        self.trips
            .get(&id)
            .map(|r| r.clone())
            .ok_or(NirbhayError::TripNotFound(id))
    }

    /// Run `f` with exclusive access to one record. Never call across an await.
    pub fn update<R>(&self, id: TripId, f: impl FnOnce(&mut TripRecord) -> R) -> Result<R> {
        let mut record = self.trips.get_mut(&id).ok_or(NirbhayError::TripNotFound(id))?;
        Ok(f(&mut record))
    }

    /// Active trips, oldest first.
    pub fn active(&self) -> Vec<ActiveTrip> {
        let mut trips: Vec<ActiveTrip> = self
            .trips
            .iter()
            .filter(|r| r.trip.is_active())
            .map(|r| ActiveTrip {
                id: r.trip.id,
                start_time: r.trip.start_time,
                status: r.trip.status,
            })
            .collect();
        trips.sort_by_key(|t| t.start_time);
        trips
    }

    /// Drop the longest-finished trips until at most `keep` finished trips
    /// remain. Active trips are never touched. Returns how many were dropped.
    pub fn evict_finished(&self, keep: usize) -> usize {
        let mut finished: Vec<(DateTime<Utc>, TripId)> = self
            .trips
            .iter()
            .filter(|r| !r.trip.is_active())
            .map(|r| (r.trip.end_time.unwrap_or(r.trip.start_time), r.trip.id))
            .collect();
        if finished.len() <= keep {
            return 0;
        }
        finished.sort_unstable();
        let excess = finished.len() - keep;
        finished[..excess]
            .iter()
            .filter(|(_, id)| self.trips.remove_if(id, |_, r| !r.trip.is_active()).is_some())
            .count()
    }

    pub fn active_count(&self) -> usize {
        self.trips.iter().filter(|r| r.trip.is_active()).count()
    }

    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }
}
