use serde::{Deserialize, Serialize};

use nirbhay_core::{LocationPoint, RiskEvent, TripId};

/// Label used for alerts sent from the test endpoint.
pub const TEST_ALERT_LABEL: &str = "TEST_ALERT";

/// Push notification title.
pub const PUSH_TITLE: &str = "Safety Alert";

/// Something guardians must be told about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub trip_id: TripId,
    /// Rule name or other short label shown to the guardian.
    pub label: String,
    pub confidence: f64,
    pub location: Option<LocationPoint>,
}

impl Alert {
    pub fn from_risk(trip_id: TripId, risk: &RiskEvent) -> Self {
        Self {
            trip_id,
            label: risk.rule.to_string(),
            confidence: risk.confidence,
            location: risk.last_known_location.clone(),
        }
    }

    pub fn test(trip_id: TripId, location: Option<LocationPoint>) -> Self {
        Self {
            trip_id,
            label: TEST_ALERT_LABEL.into(),
            confidence: 1.0,
            location,
        }
    }

    /// Prefer a fresher location than the one captured with the risk.
    pub fn with_location(mut self, location: Option<LocationPoint>) -> Self {
        if location.is_some() {
            self.location = location;
        }
        self
    }

    /// Human-readable text for SMS and push bodies.
    pub fn message(&self, prefix: &str) -> String {
        let mut text = format!(
            "{}: Potential risk detected. Rule: {}. User may need help.",
            prefix, self.label
        );
        match &self.location {
            Some(loc) => {
                text.push_str(" Location: ");
                text.push_str(&loc.map_url());
            }
            None => text.push_str(" Location unavailable."),
        }
        text
    }
}

/// Normalize a phone number for an Indian SMS route: drop `+`, spaces, dashes and
/// brackets, then strip a leading `91` country code from longer numbers.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.strip_prefix("91") {
        Some(local) if digits.len() > 10 => local.to_string(),
        _ => digits,
    }
}
