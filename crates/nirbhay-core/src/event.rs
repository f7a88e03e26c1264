use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{LocationSource, RiskRuleId, TripStatus};

/// Events published by the trip monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Trip lifecycle ─────────────────────────────────────────
    TripStarted {
        trip_id: Uuid,
        guardians: usize,
    },
    TripEnded {
        trip_id: Uuid,
        status: TripStatus,
    },

    // ── Sensing ────────────────────────────────────────────────
    PanicOnset {
        trip_id: Uuid,
        accel_variance: f64,
        gyro_variance: f64,
    },
    LocationRecorded {
        trip_id: Uuid,
        source: LocationSource,
        accuracy: f64,
    },
    NoLocationAvailable {
        trip_id: Uuid,
    },

    // ── Risk / escalation ──────────────────────────────────────
    RiskDetected {
        trip_id: Uuid,
        rule: RiskRuleId,
        confidence: f64,
    },
    /// A risk event arrived while a safety check was already open.
    RiskDiscarded {
        trip_id: Uuid,
        rule: RiskRuleId,
    },
    SafetyCheckStarted {
        trip_id: Uuid,
        session_id: Uuid,
        countdown_secs: u32,
    },
    CountdownTick {
        trip_id: Uuid,
        session_id: Uuid,
        remaining_secs: u32,
    },
    SafetyCheckResolved {
        trip_id: Uuid,
        session_id: Uuid,
        safe: bool,
        reason: String,
    },
    AlertDispatched {
        trip_id: Uuid,
        push_sent: bool,
        sms_sent: bool,
    },

    // ── System ─────────────────────────────────────────────────
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for system-wide pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
