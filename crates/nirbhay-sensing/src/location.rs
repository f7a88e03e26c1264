//! Location source selection and bounded history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use nirbhay_config::LocationConfig;
use nirbhay_config::schema::{FALLBACK_ACCURACY_CEIL_M, FALLBACK_ACCURACY_FLOOR_M, FALLBACK_JITTER_MAX_M};
use nirbhay_core::{LocationPoint, LocationSource, geo};

/// Tag a fix by its accuracy radius.
pub fn classify_source(accuracy: f64, gps_accuracy_limit_m: f64) -> LocationSource {
    if accuracy <= gps_accuracy_limit_m {
        LocationSource::Gps
    } else {
        LocationSource::Fallback
    }
}

/// Tracks where the traveller is, with a degraded estimate when fixes stop arriving.
#[derive(Debug, Clone)]
pub struct LocationManager {
    history: VecDeque<LocationPoint>,
    /// Last point that came from an actual fix. Synthesized points are anchored here
    /// so repeated fallback ticks do not random-walk away from it.
    last_real: Option<LocationPoint>,
    config: LocationConfig,
}

impl LocationManager {
    /// The fallback band and jitter are clamped so synthesized points always read
    /// as 80–100 m estimates within 10 m of the last fix.
    pub fn new(config: &LocationConfig) -> Self {
        let mut config = config.clone();
        config.fallback_accuracy_min_m = clamp_or(
            config.fallback_accuracy_min_m,
            FALLBACK_ACCURACY_FLOOR_M,
            FALLBACK_ACCURACY_CEIL_M,
        );
        config.fallback_accuracy_max_m = clamp_or(
            config.fallback_accuracy_max_m,
            config.fallback_accuracy_min_m,
            FALLBACK_ACCURACY_CEIL_M,
        );
        config.fallback_jitter_m = clamp_or(config.fallback_jitter_m, 0.0, FALLBACK_JITTER_MAX_M);
        Self {
            history: VecDeque::with_capacity(config.history_limit),
            last_real: None,
            config,
        }
    }

    /// Record a real position fix.
    pub fn on_fix(&mut self, latitude: f64, longitude: f64, accuracy: f64) -> LocationPoint {
        let source = classify_source(accuracy, self.config.gps_accuracy_limit_m);
        let point = LocationPoint::new(latitude, longitude, accuracy, source);
        debug!(%source, accuracy, "fix recorded");
        self.last_real = Some(point.clone());
        self.append(point.clone());
        point
    }

    /// No fix this period: synthesize a fallback point near the last real fix.
    /// Returns `None` (and records nothing) when no fix was ever seen.
    pub fn on_fix_unavailable(&mut self) -> Option<LocationPoint> {
        let Some(anchor) = self.last_real.as_ref() else {
            warn!("no location available");
            return None;
        };

        let radius = self.config.fallback_jitter_m * rand::random::<f64>().sqrt();
        let bearing = rand::random::<f64>() * std::f64::consts::TAU;
        let (latitude, longitude) = geo::offset(
            anchor.latitude,
            anchor.longitude,
            radius * bearing.cos(),
            radius * bearing.sin(),
        );
        let (min, max) = (self.config.fallback_accuracy_min_m, self.config.fallback_accuracy_max_m);
        let accuracy = min + (max - min) * rand::random::<f64>();

        let point = LocationPoint::new(latitude, longitude, accuracy, LocationSource::Fallback);
        debug!(accuracy, jitter_m = radius, "fallback point synthesized");
        self.append(point.clone());
        Some(point)
    }

    pub fn last(&self) -> Option<&LocationPoint> {
        self.history.back()
    }

    pub fn last_real(&self) -> Option<&LocationPoint> {
        self.last_real.as_ref()
    }

    pub fn history(&self) -> impl Iterator<Item = &LocationPoint> {
        self.history.iter()
    }

    /// Points no older than `since`, oldest first.
    pub fn since(&self, since: DateTime<Utc>) -> Vec<LocationPoint> {
        self.history.iter().filter(|p| p.timestamp >= since).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    fn append(&mut self, point: LocationPoint) {
        self.history.push_back(point);
        self.trim();
    }

    fn trim(&mut self) {
        while self.history.len() > self.config.history_limit.max(1) {
            self.history.pop_front();
        }
    }
}

/// `value` clamped to `[lo, hi]`, with NaN pinned to `hi`.
fn clamp_or(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() { hi } else { value.clamp(lo, hi) }
}
