use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};
use tracing::info;

use nirbhay_config::RiskConfig;
use nirbhay_core::{LocationPoint, MotionReading, RiskEvent};

use crate::rules::{GpsLossMovement, PanicAbnormalStop, PanicAtNight, ProlongedStop, RiskRule, RuleContext};

/// Evidence handed to the engine for one tick.
#[derive(Debug, Clone, Copy)]
pub struct RiskWindow<'a> {
    /// Motion readings, oldest first. Older entries are filtered out by the engine.
    pub motion: &'a [MotionReading],
    /// Retained location history, oldest first.
    pub locations: &'a [LocationPoint],
    /// Wall-clock time in the traveller's local offset.
    pub now: DateTime<FixedOffset>,
    /// Evidence older than this is ignored, e.g. everything before a
    /// safety check that resolved as safe.
    pub floor: Option<DateTime<Utc>>,
}

impl<'a> RiskWindow<'a> {
    pub fn new(motion: &'a [MotionReading], locations: &'a [LocationPoint], now: DateTime<FixedOffset>) -> Self {
        Self {
            motion,
            locations,
            now,
            floor: None,
        }
    }

    pub fn with_floor(mut self, floor: Option<DateTime<Utc>>) -> Self {
        self.floor = floor;
        self
    }
}

/// The risk engine checks every registered rule in priority order; the first match wins.
pub struct RiskEngine {
    rules: Vec<Box<dyn RiskRule>>,
    config: RiskConfig,
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new(&RiskConfig::default())
    }
}

impl RiskEngine {
    pub fn new(config: &RiskConfig) -> Self {
        let mut engine = Self {
            rules: Vec::new(),
            config: config.clone(),
        };
        engine.add_rule(Box::new(PanicAbnormalStop));
        engine.add_rule(Box::new(PanicAtNight));
        engine.add_rule(Box::new(GpsLossMovement));
        engine.add_rule(Box::new(ProlongedStop));
        engine
    }

    pub fn add_rule(&mut self, rule: Box<dyn RiskRule>) {
        self.rules.push(rule);
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Evaluate the window. Returns at most one event. Performs no I/O.
    pub fn evaluate(&self, window: &RiskWindow<'_>) -> Option<RiskEvent> {
        let now_utc = window.now.with_timezone(&Utc);
        let window_start = now_utc - Duration::seconds(self.config.window_secs as i64);
        let floor = window.floor.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recent_start = window_start.max(floor);

        // Histories are appended in time order, so a suffix holds the recent entries.
        let retained = suffix_since(window.locations, floor, |p| p.timestamp);
        let recent_locations = suffix_since(retained, recent_start, |p| p.timestamp);
        let recent_motion = suffix_since(window.motion, recent_start, |m| m.timestamp);

        let ctx = RuleContext {
            recent_motion,
            recent_locations,
            retained_locations: retained,
            local_hour: window.now.hour(),
            config: &self.config,
        };

        for rule in &self.rules {
            let Some(signals) = rule.check(&ctx) else {
                continue;
            };
            let rule_id = rule.id();
            let location = recent_locations.last().or(retained.last()).cloned();
            let motion = recent_motion
                .iter()
                .rev()
                .find(|m| m.is_panic())
                .or(recent_motion.last())
                .copied();
            info!(rule = %rule_id, confidence = rule_id.confidence(), ?signals, "risk rule matched");
            return Some(
                RiskEvent::new(rule_id, signals, now_utc)
                    .with_location(location)
                    .with_motion(motion),
            );
        }
        None
    }
}

fn suffix_since<T>(items: &[T], since: DateTime<Utc>, ts: impl Fn(&T) -> DateTime<Utc>) -> &[T] {
    let start = items.partition_point(|item| ts(item) < since);
    &items[start..]
}
