use serde::{Deserialize, Serialize};

/// Root configuration, maps to `nirbhay.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NirbhayConfig {
    pub motion: MotionConfig,
    pub location: LocationConfig,
    pub risk: RiskConfig,
    pub escalation: EscalationConfig,
    pub alerts: AlertsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub services: ServicesConfig,
}

// ── Motion ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Acceleration-magnitude variance above which a window may be panic (m/s²)².
    pub accel_threshold: f64,
    /// Angular-rate-magnitude variance above which a window may be panic (rad/s)².
    pub gyro_threshold: f64,
    /// Ring buffer capacity per sensor. 40 samples ≈ 2 s at 20 Hz.
    pub window_capacity: usize,
    /// Motion evaluation tick in milliseconds.
    pub eval_interval_ms: u64,
    /// Thresholds the backend applies to submitted variance statistics.
    /// Advisory only: the device verdict starts escalation.
    pub server_accel_threshold: f64,
    pub server_gyro_threshold: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            accel_threshold: 15.0,
            gyro_threshold: 5.0,
            window_capacity: 40,
            eval_interval_ms: 1_000,
            server_accel_threshold: 2.0,
            server_gyro_threshold: 0.5,
        }
    }
}

// ── Location ───────────────────────────────────────────────────

/// Lowest accuracy radius a synthesized fallback point may carry (meters).
pub const FALLBACK_ACCURACY_FLOOR_M: f64 = 80.0;
/// Highest accuracy radius a synthesized fallback point may carry (meters).
pub const FALLBACK_ACCURACY_CEIL_M: f64 = 100.0;
/// Largest radial jitter around the last real fix (meters).
pub const FALLBACK_JITTER_MAX_M: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Fixes with an accuracy radius at or below this are GPS-grade (meters).
    pub gps_accuracy_limit_m: f64,
    /// Most-recent location points retained per trip.
    pub history_limit: usize,
    /// How long without a fix before last-known fallback kicks in, and the poll cadence after that.
    pub fallback_poll_secs: u64,
    /// Maximum radial jitter applied to a synthesized fallback point (meters).
    pub fallback_jitter_m: f64,
    /// Accuracy radius band for synthesized points (meters).
    pub fallback_accuracy_min_m: f64,
    pub fallback_accuracy_max_m: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            gps_accuracy_limit_m: 100.0,
            history_limit: 100,
            fallback_poll_secs: 10,
            fallback_jitter_m: 10.0,
            fallback_accuracy_min_m: 80.0,
            fallback_accuracy_max_m: 100.0,
        }
    }
}

// ── Risk ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// How far back the rule engine looks for motion readings and location points.
    pub window_secs: u64,
    /// Two consecutive points closer than this count as a halt (meters).
    pub stop_radius_m: f64,
    /// Night starts at this local hour (inclusive).
    pub night_start_hour: u32,
    /// Night ends at this local hour (exclusive).
    pub night_end_hour: u32,
    /// Net displacement across fallback points that counts as continued movement (meters).
    /// Kept above twice the fallback jitter so synthesized points never qualify.
    pub fallback_min_displacement_m: f64,
    /// Prolonged stop: the first two legs of the last five points must exceed this (meters).
    pub prolonged_movement_m: f64,
    /// Prolonged stop: the last two legs must stay under this (meters).
    pub prolonged_stop_m: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            stop_radius_m: 10.0,
            night_start_hour: 22,
            night_end_hour: 5,
            fallback_min_displacement_m: 25.0,
            prolonged_movement_m: 100.0,
            prolonged_stop_m: 20.0,
        }
    }
}

// ── Escalation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Seconds the user has to answer, and again to enter the code.
    pub countdown_secs: u32,
    /// The 4-digit safety code. When unset every code entry is treated as wrong.
    pub safety_code: Option<String>,
    /// Vibrate the device when a safety check opens.
    pub vibrate: bool,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 20,
            safety_code: None,
            vibrate: true,
        }
    }
}

// ── Alerts ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Upper bound for a single gateway attempt.
    pub dispatch_timeout_secs: u64,
    /// Leading text of every alert message.
    pub message_prefix: String,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_secs: 10,
            message_prefix: "NIRBHAY ALERT".into(),
        }
    }
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub listen: String,
    /// Enable permissive CORS (the mobile web client runs on another origin).
    pub cors: bool,
    /// Per-trip cap on stored locations, motion readings and risk events.
    pub history_limit: usize,
    /// Ended or alerted trips kept in memory. The oldest are dropped first;
    /// active trips are never dropped.
    pub max_finished_trips: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8001".into(),
            cors: true,
            history_limit: 500,
            max_finished_trips: 1_000,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Services ───────────────────────────────────────────────────

/// External gateway keys and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Fast2SMS API key. Without it SMS delivery is simulated.
    /// Can also be set via FAST2SMS_API_KEY.
    pub fast2sms_api_key: Option<String>,
    /// FCM server key. Without it push delivery is simulated.
    /// Can also be set via FCM_SERVER_KEY.
    pub fcm_server_key: Option<String>,
    /// Unwired Labs geolocation key, reported by the health probe.
    /// Can also be set via UNWIRED_LABS_API_KEY.
    pub unwired_labs_api_key: Option<String>,
    /// Backend base URL used by the device runtime (e.g. "http://127.0.0.1:8001").
    pub backend_url: Option<String>,
    /// Upper bound for a single telemetry request.
    pub telemetry_timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            fast2sms_api_key: None,
            fcm_server_key: None,
            unwired_labs_api_key: None,
            backend_url: None,
            telemetry_timeout_secs: 5,
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "[{}] {}: {}", tag, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

/// True when `code` is exactly four ASCII digits.
pub fn is_valid_safety_code(code: &str) -> bool {
    code.len() == 4 && code.bytes().all(|b| b.is_ascii_digit())
}

impl NirbhayConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();
        let mut push = |field: &str, message: String, severity: WarningSeverity, hint: Option<&str>| {
            warnings.push(ConfigWarning {
                field: field.into(),
                message,
                severity,
                hint: hint.map(Into::into),
            });
        };

        // ── Motion thresholds ───
        if self.motion.accel_threshold <= 0.0 {
            push(
                "motion.accel_threshold",
                format!("threshold {} must be positive", self.motion.accel_threshold),
                WarningSeverity::Error,
                Some("Typical values are 2.0 (sensitive) to 15.0 (conservative)"),
            );
        }
        if self.motion.gyro_threshold <= 0.0 {
            push(
                "motion.gyro_threshold",
                format!("threshold {} must be positive", self.motion.gyro_threshold),
                WarningSeverity::Error,
                Some("Typical values are 0.5 (sensitive) to 5.0 (conservative)"),
            );
        }
        if !(30..=50).contains(&self.motion.window_capacity) {
            push(
                "motion.window_capacity",
                format!("capacity {} is outside 30–50", self.motion.window_capacity),
                WarningSeverity::Error,
                Some("The window should span 1.5–2.5 s at ~20 Hz"),
            );
        }
        if !(1_000..=2_000).contains(&self.motion.eval_interval_ms) {
            push(
                "motion.eval_interval_ms",
                format!("interval {} ms is outside 1000–2000", self.motion.eval_interval_ms),
                WarningSeverity::Warning,
                None,
            );
        }

        // ── Location ───
        if self.location.fallback_accuracy_min_m > self.location.fallback_accuracy_max_m {
            push(
                "location.fallback_accuracy_min_m",
                "minimum exceeds maximum".into(),
                WarningSeverity::Error,
                Some("Default band is 80–100 m"),
            );
        }
        if self.location.fallback_accuracy_min_m < FALLBACK_ACCURACY_FLOOR_M {
            push(
                "location.fallback_accuracy_min_m",
                format!(
                    "minimum {} m is below {FALLBACK_ACCURACY_FLOOR_M} m",
                    self.location.fallback_accuracy_min_m
                ),
                WarningSeverity::Error,
                Some("Synthesized points must never look GPS-grade"),
            );
        }
        if self.location.fallback_accuracy_max_m > FALLBACK_ACCURACY_CEIL_M {
            push(
                "location.fallback_accuracy_max_m",
                format!(
                    "maximum {} m is above {FALLBACK_ACCURACY_CEIL_M} m",
                    self.location.fallback_accuracy_max_m
                ),
                WarningSeverity::Error,
                Some("Default band is 80–100 m"),
            );
        }
        if !(0.0..=FALLBACK_JITTER_MAX_M).contains(&self.location.fallback_jitter_m) {
            push(
                "location.fallback_jitter_m",
                format!(
                    "jitter {} m is outside 0–{FALLBACK_JITTER_MAX_M} m",
                    self.location.fallback_jitter_m
                ),
                WarningSeverity::Error,
                Some("Fallback points stay within about 10 m of the last fix"),
            );
        }
        if self.location.history_limit == 0 {
            push(
                "location.history_limit",
                "history limit is 0, fallback has nothing to estimate from".into(),
                WarningSeverity::Error,
                Some("Set to e.g. 100"),
            );
        }
        if self.location.fallback_poll_secs == 0 {
            push(
                "location.fallback_poll_secs",
                "poll interval must be at least 1 second".into(),
                WarningSeverity::Error,
                None,
            );
        }

        // ── Risk ───
        if self.risk.night_start_hour > 23 || self.risk.night_end_hour > 23 {
            push(
                "risk.night_start_hour",
                format!(
                    "night window {}–{} has an hour outside 0–23",
                    self.risk.night_start_hour, self.risk.night_end_hour
                ),
                WarningSeverity::Error,
                None,
            );
        }
        if self.risk.fallback_min_displacement_m <= 2.0 * self.location.fallback_jitter_m {
            push(
                "risk.fallback_min_displacement_m",
                "displacement threshold is within the fallback jitter envelope".into(),
                WarningSeverity::Warning,
                Some("Synthesized fallback points may trigger GPS_LOSS_CELLULAR_MOVEMENT on their own"),
            );
        }

        // ── Escalation ───
        if self.escalation.countdown_secs == 0 {
            push(
                "escalation.countdown_secs",
                "countdown of 0 seconds alerts immediately".into(),
                WarningSeverity::Error,
                Some("Default is 20"),
            );
        }
        match self.escalation.safety_code.as_deref() {
            None => push(
                "escalation.safety_code",
                "no safety code set: every code entry will raise an alert".into(),
                WarningSeverity::Warning,
                Some("Set a 4-digit code or NIRBHAY_SAFETY_CODE"),
            ),
            Some(code) if !is_valid_safety_code(code) => push(
                "escalation.safety_code",
                "safety code must be exactly 4 digits".into(),
                WarningSeverity::Error,
                None,
            ),
            Some(_) => {}
        }

        // ── Server listen address ───
        if self.server.listen.is_empty() {
            push(
                "server.listen",
                "listen address is empty".into(),
                WarningSeverity::Error,
                Some("Set to e.g. '127.0.0.1:8001'"),
            );
        } else if self.server.listen.starts_with("0.0.0.0") {
            push(
                "server.listen",
                "binding to 0.0.0.0: server is accessible from all interfaces".into(),
                WarningSeverity::Warning,
                Some("The API has no authentication; put it behind a gateway"),
            );
        }

        // ── Gateways ───
        if self.services.fast2sms_api_key.is_none() {
            push(
                "services.fast2sms_api_key",
                "SMS gateway not configured: SMS alerts are simulated".into(),
                WarningSeverity::Info,
                None,
            );
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            push(
                "logging.format",
                format!("unknown log format '{}'", self.logging.format),
                WarningSeverity::Warning,
                Some(&format!("Valid values: {}", valid_formats.join(", "))),
            );
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            push(
                "logging.level",
                format!("unknown log level '{}'", self.logging.level),
                WarningSeverity::Warning,
                Some(&format!("Valid values: {}", valid_levels.join(", "))),
            );
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
