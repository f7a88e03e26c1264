//! Prometheus-compatible metrics endpoint for the Nirbhay backend.
//!
//! Tracks request counts, trip lifecycle, telemetry volume, advisory risk
//! detections and alert delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Global metrics registry.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Total HTTP requests served.
    http_requests_total: AtomicU64,
    /// Total HTTP errors (4xx + 5xx).
    http_errors_total: AtomicU64,
    trips_created_total: AtomicU64,
    trips_ended_total: AtomicU64,
    locations_total: AtomicU64,
    /// Location points tagged `fallback`.
    fallback_locations_total: AtomicU64,
    motion_events_total: AtomicU64,
    /// Motion submissions the server judged to be panic.
    panic_verdicts_total: AtomicU64,
    risk_detections_total: AtomicU64,
    alerts_dispatched_total: AtomicU64,
    sms_failures_total: AtomicU64,
    push_failures_total: AtomicU64,
    /// Server start time for uptime calculation.
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                http_requests_total: AtomicU64::new(0),
                http_errors_total: AtomicU64::new(0),
                trips_created_total: AtomicU64::new(0),
                trips_ended_total: AtomicU64::new(0),
                locations_total: AtomicU64::new(0),
                fallback_locations_total: AtomicU64::new(0),
                motion_events_total: AtomicU64::new(0),
                panic_verdicts_total: AtomicU64::new(0),
                risk_detections_total: AtomicU64::new(0),
                alerts_dispatched_total: AtomicU64::new(0),
                sms_failures_total: AtomicU64::new(0),
                push_failures_total: AtomicU64::new(0),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn inc_http_requests(&self) {
        self.inner.http_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_http_errors(&self) {
        self.inner.http_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_trips_created(&self) {
        self.inner.trips_created_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_trips_ended(&self) {
        self.inner.trips_ended_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_locations(&self, fallback: bool) {
        self.inner.locations_total.fetch_add(1, Ordering::Relaxed);
        if fallback {
            self.inner.fallback_locations_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_motion_events(&self, panic: bool) {
        self.inner.motion_events_total.fetch_add(1, Ordering::Relaxed);
        if panic {
            self.inner.panic_verdicts_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_risk_detections(&self) {
        self.inner.risk_detections_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one dispatch and which channels failed.
    pub fn record_dispatch(&self, push_sent: bool, sms_sent: bool) {
        self.inner.alerts_dispatched_total.fetch_add(1, Ordering::Relaxed);
        if !push_sent {
            self.inner.push_failures_total.fetch_add(1, Ordering::Relaxed);
        }
        if !sms_sent {
            self.inner.sms_failures_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn render_prometheus(&self, active_trips: usize) -> String {
        let m = &self.inner;
        let uptime = m.started_at.elapsed().as_secs();

        format!(
            r#"# HELP nirbhay_uptime_seconds Time since the server started.
# TYPE nirbhay_uptime_seconds gauge
nirbhay_uptime_seconds {}

# HELP nirbhay_active_trips Trips currently being tracked.
# TYPE nirbhay_active_trips gauge
nirbhay_active_trips {}

# HELP nirbhay_http_requests_total Total HTTP requests served.
# TYPE nirbhay_http_requests_total counter
nirbhay_http_requests_total {}

# HELP nirbhay_http_errors_total Total HTTP errors (4xx/5xx).
# TYPE nirbhay_http_errors_total counter
nirbhay_http_errors_total {}

# HELP nirbhay_trips_created_total Total trips started.
# TYPE nirbhay_trips_created_total counter
nirbhay_trips_created_total {}

# HELP nirbhay_trips_ended_total Total trips ended normally.
# TYPE nirbhay_trips_ended_total counter
nirbhay_trips_ended_total {}

# HELP nirbhay_locations_total Total location points received.
# TYPE nirbhay_locations_total counter
nirbhay_locations_total {}

# HELP nirbhay_fallback_locations_total Location points received with degraded accuracy.
# TYPE nirbhay_fallback_locations_total counter
nirbhay_fallback_locations_total {}

# HELP nirbhay_motion_events_total Total motion statistics received.
# TYPE nirbhay_motion_events_total counter
nirbhay_motion_events_total {}

# HELP nirbhay_panic_verdicts_total Motion submissions classified as panic by the server.
# TYPE nirbhay_panic_verdicts_total counter
nirbhay_panic_verdicts_total {}

# HELP nirbhay_risk_detections_total Advisory risk rule matches.
# TYPE nirbhay_risk_detections_total counter
nirbhay_risk_detections_total {}

# HELP nirbhay_alerts_dispatched_total Total alert dispatches attempted.
# TYPE nirbhay_alerts_dispatched_total counter
nirbhay_alerts_dispatched_total {}

# HELP nirbhay_sms_failures_total Dispatches where no SMS went through.
# TYPE nirbhay_sms_failures_total counter
nirbhay_sms_failures_total {}

# HELP nirbhay_push_failures_total Dispatches where no push notification went through.
# TYPE nirbhay_push_failures_total counter
nirbhay_push_failures_total {}
"#,
            uptime,
            active_trips,
            m.http_requests_total.load(Ordering::Relaxed),
            m.http_errors_total.load(Ordering::Relaxed),
            m.trips_created_total.load(Ordering::Relaxed),
            m.trips_ended_total.load(Ordering::Relaxed),
            m.locations_total.load(Ordering::Relaxed),
            m.fallback_locations_total.load(Ordering::Relaxed),
            m.motion_events_total.load(Ordering::Relaxed),
            m.panic_verdicts_total.load(Ordering::Relaxed),
            m.risk_detections_total.load(Ordering::Relaxed),
            m.alerts_dispatched_total.load(Ordering::Relaxed),
            m.sms_failures_total.load(Ordering::Relaxed),
            m.push_failures_total.load(Ordering::Relaxed),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_counter_increments() {
        let m = Metrics::new();
        m.inc_http_requests();
        m.inc_http_requests();
        m.inc_trips_created();
        let output = m.render_prometheus(1);
        assert!(output.contains("nirbhay_http_requests_total 2"));
        assert!(output.contains("nirbhay_trips_created_total 1"));
        assert!(output.contains("nirbhay_active_trips 1"));
    }

    #[test]
    fn test_metrics_split_counters() {
        let m = Metrics::new();
        m.inc_locations(false);
        m.inc_locations(true);
        m.inc_motion_events(true);
        m.inc_motion_events(false);
        let output = m.render_prometheus(0);
        assert!(output.contains("nirbhay_locations_total 2"));
        assert!(output.contains("nirbhay_fallback_locations_total 1"));
        assert!(output.contains("nirbhay_motion_events_total 2"));
        assert!(output.contains("nirbhay_panic_verdicts_total 1"));
    }

    #[test]
    fn test_metrics_dispatch_failures() {
        let m = Metrics::new();
        m.record_dispatch(false, true);
        m.record_dispatch(false, false);
        let output = m.render_prometheus(0);
        assert!(output.contains("nirbhay_alerts_dispatched_total 2"));
        assert!(output.contains("nirbhay_push_failures_total 2"));
        assert!(output.contains("nirbhay_sms_failures_total 1"));
    }

    #[test]
    fn test_metrics_prometheus_format() {
        let m = Metrics::new();
        let output = m.render_prometheus(0);
        assert!(output.contains("# HELP nirbhay_uptime_seconds"));
        assert!(output.contains("# TYPE nirbhay_uptime_seconds gauge"));
        assert!(output.contains("# TYPE nirbhay_http_requests_total counter"));
    }
}
