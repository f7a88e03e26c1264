//! # nirbhay-server
//!
//! HTTP/JSON backend under `/api`. Provides:
//!
//! - trip lifecycle (create, read, end, guardian updates)
//! - location and motion telemetry, with an advisory server-side risk check
//! - guardian alert dispatch, including a test alert
//! - health and Prometheus metrics
//!
//! Trips live in memory. Server-side risk verdicts are recorded for `/debug`
//! and never dispatch on their own; the device decides when to escalate.

pub mod metrics;
pub mod store;

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{FromRequest, Path, Request, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use chrono::{Local, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use nirbhay_alerts::{Alert, AlertDispatcher, DispatchReport, GatewayDispatcher};
use nirbhay_config::NirbhayConfig;
use nirbhay_core::api::{
    ActiveTrip, AlertRequest, CreateTripRequest, ErrorBody, GuardianUpdate, GuardianUpdated, HealthResponse,
    LocationAccepted, LocationSubmission, MotionAccepted, MotionSubmission, RiskEvaluation, ServiceStatus,
    TestAlertResponse, TripCreated, TripEndedResponse,
};
use nirbhay_core::{LocationPoint, LocationSource, MotionReading, MotionState, NirbhayError, RiskEvent, TripId};
use nirbhay_risk::RiskEngine;
use nirbhay_sensing::classify;

use crate::store::{TripDebug, TripRecord, TripStore};

/// Label for alerts triggered through `/alert` without a rule name.
pub const MANUAL_ALERT_LABEL: &str = "MANUAL_ALERT";

/// Shared server state.
pub struct AppState {
    /// Reloadable configuration. Thresholds are read per request.
    pub config: Arc<RwLock<NirbhayConfig>>,
    pub store: TripStore,
    pub metrics: metrics::Metrics,
    pub dispatcher: Arc<dyn AlertDispatcher>,
    services: ServiceStatus,
}

impl AppState {
    pub fn new(config: Arc<RwLock<NirbhayConfig>>, dispatcher: Arc<dyn AlertDispatcher>) -> Self {
        let services = {
            let cfg = config.read();
            let readiness = |key: &Option<String>, missing: &str| {
                (if key.is_some() { "configured" } else { missing }).to_string()
            };
            ServiceStatus {
                storage: "in_memory".into(),
                sms: readiness(&cfg.services.fast2sms_api_key, "demo_mode"),
                push: readiness(&cfg.services.fcm_server_key, "demo_mode"),
                geolocation: readiness(&cfg.services.unwired_labs_api_key, "not_configured"),
            }
        };
        Self {
            config,
            store: TripStore::new(),
            metrics: metrics::Metrics::new(),
            dispatcher,
            services,
        }
    }

    /// State with gateway dispatch built from the configured keys.
    pub fn from_config(config: Arc<RwLock<NirbhayConfig>>) -> Self {
        let dispatcher = GatewayDispatcher::from_config(&config.read());
        Self::new(config, Arc::new(dispatcher))
    }

    fn engine(&self) -> RiskEngine {
        RiskEngine::new(&self.config.read().risk)
    }
}

// ── Errors ─────────────────────────────────────────────────────

/// Error response: a status code and a `{"detail": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn unprocessable(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: detail.into(),
        }
    }

    fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: "Trip not found".into(),
        }
    }
}

impl From<NirbhayError> for ApiError {
    fn from(e: NirbhayError) -> Self {
        match e {
            NirbhayError::TripNotFound(_) => Self::not_found(),
            NirbhayError::TripNotActive(_) => Self {
                status: StatusCode::BAD_REQUEST,
                detail: "Trip is not active".into(),
            },
            NirbhayError::InvalidGuardians(reason) => Self {
                status: StatusCode::BAD_REQUEST,
                detail: reason,
            },
            other => {
                warn!(error = %other, "request failed");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    detail: other.to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// JSON body extractor that answers every malformed body with 422.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::unprocessable(rejection.body_text())),
        }
    }
}

/// Parse an optional JSON body: empty means default.
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> std::result::Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::unprocessable(e.to_string()))
}

/// Unknown and unparseable ids are both "not found".
fn trip_id(raw: &str) -> std::result::Result<TripId, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::not_found())
}

// ── Router ─────────────────────────────────────────────────────

/// Build the Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = state.config.read().server.cors;

    let api_routes = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/trips", post(create_trip_handler))
        .route("/api/trips/active/list", get(active_trips_handler))
        .route("/api/trips/{id}", get(get_trip_handler))
        .route("/api/trips/{id}/location", post(location_handler))
        .route("/api/trips/{id}/motion", post(motion_handler))
        .route("/api/trips/{id}/end", post(end_trip_handler))
        .route("/api/trips/{id}/guardian", put(guardian_handler))
        .route("/api/trips/{id}/alert", post(alert_handler))
        .route("/api/trips/{id}/test-alert", post(test_alert_handler))
        .route("/api/trips/{id}/evaluate-risk", post(evaluate_risk_handler))
        .route("/api/trips/{id}/debug", get(debug_handler));

    let mut router = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(api_routes)
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

/// Bind the configured address and serve until the process exits.
pub async fn start_server(config: Arc<RwLock<NirbhayConfig>>) -> nirbhay_core::Result<()> {
    let listen = config.read().server.listen.clone();
    let state = Arc::new(AppState::from_config(config));
    let router = build_router(state);

    info!(listen = %listen, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| NirbhayError::Config(format!("failed to bind {}: {}", listen, e)))?;

    axum::serve(listener, router).await?;
    Ok(())
}

async fn count_requests(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    state.metrics.inc_http_requests();
    let response = next.run(request).await;
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        state.metrics.inc_http_errors();
    }
    response
}

// ── Health & metrics ───────────────────────────────────────────

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        timestamp: Utc::now(),
        services: state.services.clone(),
    })
}

/// Prometheus-compatible metrics endpoint.
async fn metrics_handler(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, [(axum::http::header::HeaderName, &'static str); 1], String) {
    let body = state.metrics.render_prometheus(state.store.active_count());
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

// ── Trip lifecycle ─────────────────────────────────────────────

async fn create_trip_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateTripRequest>,
) -> ApiResult<TripCreated> {
    let guardians = req.guardians()?;
    let trip = nirbhay_core::Trip::new(req.user_id, guardians);
    let created = TripCreated {
        trip_id: trip.id,
        user_id: trip.user_id.clone(),
        status: trip.status,
        start_time: trip.start_time,
        guardian_count: trip.guardians.len(),
    };

    let (limit, keep_finished) = {
        let cfg = state.config.read();
        (cfg.server.history_limit, cfg.server.max_finished_trips)
    };
    state.store.insert(trip, limit);
    let evicted = state.store.evict_finished(keep_finished);
    if evicted > 0 {
        debug!(evicted, "finished trips evicted");
    }
    state.metrics.inc_trips_created();
    info!(trip_id = %created.trip_id, guardians = created.guardian_count, "trip created");
    Ok(Json(created))
}

async fn get_trip_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<TripRecord> {
    Ok(Json(state.store.get(trip_id(&id)?)?))
}

async fn end_trip_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<TripEndedResponse> {
    let id = trip_id(&id)?;
    let (was_active, end_time) = state.store.update(id, |rec| {
        let was_active = rec.trip.is_active();
        rec.trip.end();
        (was_active, rec.trip.end_time)
    })?;
    if was_active {
        state.metrics.inc_trips_ended();
        info!(trip_id = %id, "trip ended");
    }
    Ok(Json(TripEndedResponse {
        message: "Trip ended".into(),
        trip_id: id,
        end_time,
    }))
}

async fn guardian_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<GuardianUpdate>,
) -> ApiResult<GuardianUpdated> {
    let id = trip_id(&id)?;
    state.store.update(id, |rec| update.apply(&mut rec.trip.guardians))??;
    info!(trip_id = %id, "guardians updated");
    Ok(Json(GuardianUpdated {
        message: "Guardian updated".into(),
        trip_id: id,
    }))
}

async fn active_trips_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ActiveTrip>> {
    Json(state.store.active())
}

// ── Telemetry ──────────────────────────────────────────────────

/// Evaluate and record an advisory risk. Never dispatches.
fn advisory_risk(state: &AppState, rec: &mut TripRecord, engine: &RiskEngine) -> Option<RiskEvent> {
    let risk = rec.evaluate(engine, Local::now().fixed_offset())?;
    warn!(
        trip_id = %rec.trip.id,
        rule = %risk.rule,
        confidence = risk.confidence,
        "advisory risk detected"
    );
    state.metrics.inc_risk_detections();
    rec.push_risk(risk.clone());
    Some(risk)
}

async fn location_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<LocationSubmission>,
) -> ApiResult<LocationAccepted> {
    let id = trip_id(&id)?;
    let valid = (-90.0..=90.0).contains(&body.latitude)
        && (-180.0..=180.0).contains(&body.longitude)
        && body.accuracy.is_finite()
        && body.accuracy >= 0.0;
    if !valid {
        return Err(ApiError::unprocessable("latitude, longitude or accuracy out of range"));
    }

    let point = LocationPoint::new(body.latitude, body.longitude, body.accuracy, body.source);
    let location_id = point.id;
    let engine = state.engine();
    state.store.update(id, |rec| {
        rec.push_location(point)?;
        advisory_risk(&state, rec, &engine);
        Ok::<_, NirbhayError>(())
    })??;

    state.metrics.inc_locations(body.source == LocationSource::Fallback);
    Ok(Json(LocationAccepted {
        message: "Location added".into(),
        location_id,
    }))
}

async fn motion_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<MotionSubmission>,
) -> ApiResult<MotionAccepted> {
    let id = trip_id(&id)?;
    let valid = [body.accel_variance, body.gyro_variance]
        .iter()
        .all(|v| v.is_finite() && *v >= 0.0);
    if !valid {
        return Err(ApiError::unprocessable("variances must be finite and non-negative"));
    }

    let (accel_threshold, gyro_threshold) = {
        let cfg = state.config.read();
        (cfg.motion.server_accel_threshold, cfg.motion.server_gyro_threshold)
    };
    let state_now = classify(body.accel_variance, body.gyro_variance, accel_threshold, gyro_threshold);
    let is_panic = state_now == MotionState::Panic;
    let engine = state.engine();

    state.store.update(id, |rec| {
        let was_panic = rec.last_motion().is_some_and(MotionReading::is_panic);
        rec.push_motion(MotionReading {
            accel_variance: body.accel_variance,
            gyro_variance: body.gyro_variance,
            state: state_now,
            panic_onset: is_panic && !was_panic,
            timestamp: Utc::now(),
        })?;
        if is_panic {
            warn!(trip_id = %id, "panic movement reported");
            advisory_risk(&state, rec, &engine);
        }
        Ok::<_, NirbhayError>(())
    })??;

    state.metrics.inc_motion_events(is_panic);
    Ok(Json(MotionAccepted {
        message: "Motion event recorded".into(),
        motion_id: Uuid::new_v4(),
        is_panic,
    }))
}

// ── Risk ───────────────────────────────────────────────────────

async fn evaluate_risk_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<RiskEvaluation> {
    let record = state.store.get(trip_id(&id)?)?;
    let evaluation = match record.evaluate(&state.engine(), Local::now().fixed_offset()) {
        Some(risk) => RiskEvaluation {
            risk_detected: true,
            rule_name: Some(risk.rule.to_string()),
            confidence: Some(risk.confidence),
            contributing_signals: Some(risk.contributing_signals),
        },
        None => RiskEvaluation::default(),
    };
    Ok(Json(evaluation))
}

async fn debug_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<TripDebug> {
    Ok(Json(state.store.get(trip_id(&id)?)?.debug()))
}

// ── Alerts ─────────────────────────────────────────────────────

async fn dispatch(state: &AppState, record: &TripRecord, alert: &Alert) -> DispatchReport {
    let report = state.dispatcher.dispatch(&record.trip, alert).await;
    state.metrics.record_dispatch(report.push_sent, report.sms_sent);
    report
}

async fn alert_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<DispatchReport> {
    let id = trip_id(&id)?;
    let req: AlertRequest = optional_json(&body)?;
    let record = state.store.get(id)?;

    let alert = Alert {
        trip_id: id,
        label: req.rule.clone().unwrap_or_else(|| MANUAL_ALERT_LABEL.to_string()),
        confidence: req.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
        location: req.location().or_else(|| record.locations.last().cloned()),
    };
    warn!(trip_id = %id, label = %alert.label, "alert requested");
    let report = dispatch(&state, &record, &alert).await;

    state.store.update(id, |rec| {
        if rec.trip.is_active() {
            rec.trip.mark_alert();
        }
    })?;
    Ok(Json(report))
}

async fn test_alert_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<TestAlertResponse> {
    let record = state.store.get(trip_id(&id)?)?;
    let alert = Alert::test(record.trip.id, record.locations.last().cloned());
    let report = dispatch(&state, &record, &alert).await;
    Ok(Json(TestAlertResponse {
        message: "Test alert sent".into(),
        push_sent: report.push_sent,
        sms_sent: report.sms_sent,
        guardian_phone: record.trip.guardians.primary().phone.clone(),
    }))
}
