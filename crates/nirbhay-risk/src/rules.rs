use nirbhay_config::RiskConfig;
use nirbhay_core::{LocationPoint, LocationSource, MotionReading, RiskRuleId};

/// Inputs visible to a rule for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// Motion readings inside the risk window, oldest first.
    pub recent_motion: &'a [MotionReading],
    /// Location points inside the risk window, oldest first.
    pub recent_locations: &'a [LocationPoint],
    /// Every retained location point, oldest first.
    pub retained_locations: &'a [LocationPoint],
    /// Local wall-clock hour, 0–23.
    pub local_hour: u32,
    pub config: &'a RiskConfig,
}

impl RuleContext<'_> {
    pub fn has_panic(&self) -> bool {
        self.recent_motion.iter().any(MotionReading::is_panic)
    }
}

/// A single risk rule. Returns the contributing signal names when it fires.
pub trait RiskRule: Send + Sync {
    fn id(&self) -> RiskRuleId;
    fn check(&self, ctx: &RuleContext<'_>) -> Option<&'static [&'static str]>;
}

/// True when `hour` falls in `[start, end)`, wrapping past midnight when `start > end`.
pub fn is_night(hour: u32, start: u32, end: u32) -> bool {
    if start > end {
        hour >= start || hour < end
    } else {
        hour >= start && hour < end
    }
}

/// Sum of consecutive leg lengths between the points.
fn path_length(points: &[LocationPoint]) -> f64 {
    points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}

// ── Built-in rules ─────────────────────────────────────────────

const ABNORMAL_STOP_SIGNALS: &[&str] = &["panic_movement", "sudden_stop"];
const NIGHT_SIGNALS: &[&str] = &["panic_movement", "night_hours"];
const GPS_LOSS_SIGNALS: &[&str] = &["gps_lost", "cellular_tracking", "continued_movement"];
const PROLONGED_STOP_SIGNALS: &[&str] = &["movement_detected", "sudden_stop", "location_stationary"];

/// Panic in the window, then the last two points almost coincide.
pub(crate) struct PanicAbnormalStop;

impl RiskRule for PanicAbnormalStop {
    fn id(&self) -> RiskRuleId {
        RiskRuleId::PanicMovementAbnormalStop
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Option<&'static [&'static str]> {
        let [.., prev, last] = ctx.recent_locations else {
            return None;
        };
        (ctx.has_panic() && prev.distance_to(last) < ctx.config.stop_radius_m)
            .then_some(ABNORMAL_STOP_SIGNALS)
    }
}

/// Panic in the window during night hours.
pub(crate) struct PanicAtNight;

impl RiskRule for PanicAtNight {
    fn id(&self) -> RiskRuleId {
        RiskRuleId::PanicMovementNight
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Option<&'static [&'static str]> {
        let night = is_night(ctx.local_hour, ctx.config.night_start_hour, ctx.config.night_end_hour);
        (ctx.has_panic() && night).then_some(NIGHT_SIGNALS)
    }
}

/// GPS was lost and the fallback track keeps moving.
pub(crate) struct GpsLossMovement;

impl RiskRule for GpsLossMovement {
    fn id(&self) -> RiskRuleId {
        RiskRuleId::GpsLossCellularMovement
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Option<&'static [&'static str]> {
        let recent = ctx.recent_locations;
        if recent.len() < 3 {
            return None;
        }
        let last_gps = recent.iter().rposition(|p| p.source == LocationSource::Gps)?;
        let after: Vec<&LocationPoint> = recent[last_gps + 1..]
            .iter()
            .filter(|p| p.source == LocationSource::Fallback)
            .collect();
        let (first, last) = match after.as_slice() {
            [first, .., last] => (*first, *last),
            _ => return None,
        };
        (first.distance_to(last) > ctx.config.fallback_min_displacement_m).then_some(GPS_LOSS_SIGNALS)
    }
}

/// Significant movement followed by a halt, over the last five retained points.
pub(crate) struct ProlongedStop;

impl RiskRule for ProlongedStop {
    fn id(&self) -> RiskRuleId {
        RiskRuleId::ProlongedStopUnusualLocation
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Option<&'static [&'static str]> {
        let all = ctx.retained_locations;
        if all.len() < 5 {
            return None;
        }
        let last5 = &all[all.len() - 5..];
        let early = path_length(&last5[..3]);
        let late = path_length(&last5[2..]);
        (early > ctx.config.prolonged_movement_m && late < ctx.config.prolonged_stop_m)
            .then_some(PROLONGED_STOP_SIGNALS)
    }
}
