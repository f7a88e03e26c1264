use thiserror::Error;
use uuid::Uuid;

/// Unified error type for the whole pipeline.
#[derive(Error, Debug)]
pub enum NirbhayError {
    // ── Trip errors ────────────────────────────────────────────
    #[error("trip not found: {0}")]
    TripNotFound(Uuid),

    #[error("trip is not active: {0}")]
    TripNotActive(Uuid),

    #[error("invalid guardian contacts: {0}")]
    InvalidGuardians(String),

    // ── Sensing errors ─────────────────────────────────────────
    /// Location or motion access was refused. The only error that stops a trip from starting.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("no location available")]
    NoLocation,

    // ── Escalation errors ──────────────────────────────────────
    #[error("safety check {0} is already open")]
    SessionAlreadyOpen(Uuid),

    #[error("no safety check is open")]
    NoOpenSession,

    #[error("input not accepted in state {state}: {input}")]
    UnexpectedInput { state: String, input: String },

    // ── Gateway / network errors ───────────────────────────────
    #[error("gateway error: {gateway}: {reason}")]
    Gateway { gateway: String, reason: String },

    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error("backend error: {status}: {body}")]
    Backend { status: u16, body: String },

    // ── Runtime errors ─────────────────────────────────────────
    #[error("trip monitor stopped")]
    MonitorStopped,

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl NirbhayError {
    /// Whether the error must stop a trip from starting.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

pub type Result<T> = std::result::Result<T, NirbhayError>;
