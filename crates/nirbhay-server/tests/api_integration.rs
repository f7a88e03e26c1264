//! HTTP API integration tests: every endpoint, driven through `oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tower::ServiceExt;

use nirbhay_alerts::{GatewayDispatcher, SimulatedGateway};
use nirbhay_config::NirbhayConfig;
use nirbhay_server::{AppState, build_router};

struct TestApp {
    router: axum::Router,
    sms: SimulatedGateway,
}

fn setup() -> TestApp {
    let config = NirbhayConfig::default();
    let sms = SimulatedGateway::new();
    let dispatcher = GatewayDispatcher::new(Arc::new(sms.clone()), Arc::new(SimulatedGateway::new()), &config.alerts);
    let state = AppState::new(Arc::new(RwLock::new(config)), Arc::new(dispatcher));
    TestApp {
        router: build_router(Arc::new(state)),
        sms,
    }
}

/// Helper to read the full body bytes from a response.
async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn create_trip(app: &TestApp) -> String {
    let (status, json) = send(
        app,
        "POST",
        "/api/trips",
        Some(json!({ "user_id": "u1", "guardian_phone": "+919876543210", "guardian_phone_2": "9876543211" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    json["trip_id"].as_str().unwrap().to_string()
}

async fn post_location(app: &TestApp, id: &str, lat: f64, lon: f64) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        &format!("/api/trips/{id}/location"),
        Some(json!({ "latitude": lat, "longitude": lon, "accuracy": 8.0, "source": "gps" })),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn test_create_and_get_trip() {
            let app = setup();
            let id = create_trip(&app).await;

            let (status, json) = send(&app, "GET", &format!("/api/trips/{id}"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["id"], id.as_str());
            assert_eq!(json["user_id"], "u1");
            assert_eq!(json["status"], "active");
            assert_eq!(json["guardians"].as_array().unwrap().len(), 2);
            assert!(json["locations"].as_array().unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_create_without_primary_guardian_is_rejected() {
            let app = setup();
            let (status, json) = send(&app, "POST", "/api/trips", Some(json!({ "user_id": "u1" }))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(json["detail"].is_string());
        }

        #[tokio::test]
        async fn test_malformed_body_is_unprocessable() {
            let app = setup();
            let (status, _) = send(&app, "POST", "/api/trips", Some(json!({ "guardian_phone": 42 }))).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        }

        #[tokio::test]
        async fn test_unknown_trip_is_not_found() {
            let app = setup();
            let unknown = uuid::Uuid::new_v4();
            let (status, json) = send(&app, "GET", &format!("/api/trips/{unknown}"), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(json["detail"], "Trip not found");

            let (status, _) = send(&app, "GET", "/api/trips/not-a-uuid", None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn test_end_trip_then_telemetry_is_refused() {
            let app = setup();
            let id = create_trip(&app).await;

            let (status, json) = send(&app, "POST", &format!("/api/trips/{id}/end"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["message"], "Trip ended");
            assert!(json["end_time"].is_string());

            let (status, json) = post_location(&app, &id, 28.6139, 77.2090).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["detail"], "Trip is not active");

            let (status, _) = send(
                &app,
                "POST",
                &format!("/api/trips/{id}/motion"),
                Some(json!({ "accel_variance": 0.1, "gyro_variance": 0.1 })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);

            let (_, active) = send(&app, "GET", "/api/trips/active/list", None).await;
            assert!(active.as_array().unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_active_list() {
            let app = setup();
            let first = create_trip(&app).await;
            let second = create_trip(&app).await;
            send(&app, "POST", &format!("/api/trips/{first}/end"), None).await;

            let (status, json) = send(&app, "GET", "/api/trips/active/list", None).await;
            assert_eq!(status, StatusCode::OK);
            let trips = json.as_array().unwrap();
            assert_eq!(trips.len(), 1);
            assert_eq!(trips[0]["id"], second.as_str());
            assert_eq!(trips[0]["status"], "active");
        }

        #[tokio::test]
        async fn test_guardian_update() {
            let app = setup();
            let id = create_trip(&app).await;

            let (status, json) = send(
                &app,
                "PUT",
                &format!("/api/trips/{id}/guardian"),
                Some(json!({ "guardian_phone": "9000000001" })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["message"], "Guardian updated");

            let (_, trip) = send(&app, "GET", &format!("/api/trips/{id}"), None).await;
            assert_eq!(trip["guardians"][0]["phone"], "9000000001");
            assert_eq!(trip["guardians"][1]["phone"], "9876543211");
        }
    }

    mod telemetry {
        use super::*;

        #[tokio::test]
        async fn test_location_accepted_and_debug_reflects_it() {
            let app = setup();
            let id = create_trip(&app).await;

            let (status, json) = post_location(&app, &id, 28.6139, 77.2090).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["message"], "Location added");
            assert!(json["location_id"].is_string());

            let (status, debug) = send(&app, "GET", &format!("/api/trips/{id}/debug"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(debug["tracking_source"], "gps");
            assert_eq!(debug["total_locations"], 1);
            assert_eq!(debug["motion_status"], "normal");
            assert_eq!(debug["guardian_phone"], "+919876543210");
        }

        #[tokio::test]
        async fn test_out_of_range_location_is_unprocessable() {
            let app = setup();
            let id = create_trip(&app).await;
            let (status, _) = post_location(&app, &id, 91.0, 77.2090).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        }

        #[tokio::test]
        async fn test_motion_verdict_uses_server_thresholds() {
            let app = setup();
            let id = create_trip(&app).await;
            let uri = format!("/api/trips/{id}/motion");

            let (status, json) =
                send(&app, "POST", &uri, Some(json!({ "accel_variance": 2.5, "gyro_variance": 0.6 }))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["message"], "Motion event recorded");
            assert_eq!(json["is_panic"], true);

            // Both thresholds must be exceeded.
            let (_, json) = send(&app, "POST", &uri, Some(json!({ "accel_variance": 2.5, "gyro_variance": 0.4 }))).await;
            assert_eq!(json["is_panic"], false);
            let (_, json) = send(&app, "POST", &uri, Some(json!({ "accel_variance": 2.0, "gyro_variance": 0.9 }))).await;
            assert_eq!(json["is_panic"], false);

            let (_, debug) = send(&app, "GET", &format!("/api/trips/{id}/debug"), None).await;
            assert_eq!(debug["total_motion_events"], 3);
            assert_eq!(debug["motion_status"], "panic_detected");
        }

        #[tokio::test]
        async fn test_history_is_bounded() {
            let mut config = NirbhayConfig::default();
            config.server.history_limit = 3;
            let state = AppState::from_config(Arc::new(RwLock::new(config)));
            let app = TestApp {
                router: build_router(Arc::new(state)),
                sms: SimulatedGateway::new(),
            };
            let id = create_trip(&app).await;
            for i in 0..5 {
                post_location(&app, &id, 28.6 + f64::from(i) * 0.01, 77.2).await;
            }
            let (_, trip) = send(&app, "GET", &format!("/api/trips/{id}"), None).await;
            assert_eq!(trip["locations"].as_array().unwrap().len(), 3);
        }
        #[tokio::test]
        async fn test_oldest_finished_trips_are_evicted() {
            let mut config = NirbhayConfig::default();
            config.server.max_finished_trips = 1;
            let state = AppState::from_config(Arc::new(RwLock::new(config)));
            let app = TestApp {
                router: build_router(Arc::new(state)),
                sms: SimulatedGateway::new(),
            };

            let first = create_trip(&app).await;
            send(&app, "POST", &format!("/api/trips/{first}/end"), None).await;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            let second = create_trip(&app).await;
            send(&app, "POST", &format!("/api/trips/{second}/end"), None).await;
            let live = create_trip(&app).await;

            let (status, _) = send(&app, "GET", &format!("/api/trips/{first}"), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            let (status, _) = send(&app, "GET", &format!("/api/trips/{second}"), None).await;
            assert_eq!(status, StatusCode::OK);
            let (_, trip) = send(&app, "GET", &format!("/api/trips/{live}"), None).await;
            assert_eq!(trip["status"], "active");
        }

        #[tokio::test]
        async fn test_eviction_never_drops_active_trips() {
            let mut config = NirbhayConfig::default();
            config.server.max_finished_trips = 0;
            let state = AppState::from_config(Arc::new(RwLock::new(config)));
            let app = TestApp {
                router: build_router(Arc::new(state)),
                sms: SimulatedGateway::new(),
            };

            let ids = [create_trip(&app).await, create_trip(&app).await, create_trip(&app).await];
            let (_, active) = send(&app, "GET", "/api/trips/active/list", None).await;
            assert_eq!(active.as_array().unwrap().len(), 3);
            for id in &ids {
                let (status, _) = send(&app, "GET", &format!("/api/trips/{id}"), None).await;
                assert_eq!(status, StatusCode::OK);
            }
        }
    }

    mod risk {
        use super::*;

        #[tokio::test]
        async fn test_evaluate_without_history_reports_nothing() {
            let app = setup();
            let id = create_trip(&app).await;
            let (status, json) = send(&app, "POST", &format!("/api/trips/{id}/evaluate-risk"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["risk_detected"], false);
            assert!(json.get("rule_name").is_none());
        }

        #[tokio::test]
        async fn test_panic_then_stop_is_detected_but_not_dispatched() {
            let app = setup();
            let id = create_trip(&app).await;
            send(
                &app,
                "POST",
                &format!("/api/trips/{id}/motion"),
                Some(json!({ "accel_variance": 3.0, "gyro_variance": 1.0 })),
            )
            .await;
            post_location(&app, &id, 28.6139, 77.2090).await;
            post_location(&app, &id, 28.6139, 77.2090).await;

            let (status, json) = send(&app, "POST", &format!("/api/trips/{id}/evaluate-risk"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["risk_detected"], true);
            let signals = json["contributing_signals"].as_array().unwrap();
            assert!(signals.iter().any(|s| s == "panic_movement"));

            let (_, debug) = send(&app, "GET", &format!("/api/trips/{id}/debug"), None).await;
            assert!(debug["last_risk_rule"].is_string());

            // Advisory only: the trip stays active and nobody is texted.
            let (_, trip) = send(&app, "GET", &format!("/api/trips/{id}"), None).await;
            assert_eq!(trip["status"], "active");
            assert!(app.sms.deliveries().is_empty());
        }
    }

    mod alerts {
        use super::*;

        #[tokio::test]
        async fn test_test_alert_reaches_guardians() {
            let app = setup();
            let id = create_trip(&app).await;
            post_location(&app, &id, 28.6139, 77.2090).await;

            let (status, json) = send(&app, "POST", &format!("/api/trips/{id}/test-alert"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["message"], "Test alert sent");
            assert_eq!(json["sms_sent"], true);
            assert_eq!(json["push_sent"], false);
            assert_eq!(json["guardian_phone"], "+919876543210");

            let deliveries = app.sms.deliveries();
            assert_eq!(deliveries.len(), 2);
            assert!(deliveries[0].text.contains("TEST_ALERT"));
            assert!(deliveries[0].text.contains("maps.google.com"));

            // A test alert does not change the trip.
            let (_, trip) = send(&app, "GET", &format!("/api/trips/{id}"), None).await;
            assert_eq!(trip["status"], "active");
        }

        #[tokio::test]
        async fn test_alert_marks_trip() {
            let app = setup();
            let id = create_trip(&app).await;

            let (status, json) = send(
                &app,
                "POST",
                &format!("/api/trips/{id}/alert"),
                Some(json!({ "rule": "PANIC_MOVEMENT_NIGHT", "confidence": 0.85 })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["sms_sent"], true);
            assert!(app.sms.deliveries()[0].text.contains("PANIC_MOVEMENT_NIGHT"));

            let (_, trip) = send(&app, "GET", &format!("/api/trips/{id}"), None).await;
            assert_eq!(trip["status"], "alert");
            let (_, active) = send(&app, "GET", "/api/trips/active/list", None).await;
            assert!(active.as_array().unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_alert_prefers_location_sent_with_it() {
            let app = setup();
            let id = create_trip(&app).await;
            post_location(&app, &id, 28.6139, 77.2090).await;

            let (status, _) = send(
                &app,
                "POST",
                &format!("/api/trips/{id}/alert"),
                Some(json!({
                    "rule": "PANIC_MOVEMENT_ABNORMAL_STOP",
                    "latitude": 19.076,
                    "longitude": 72.8777,
                    "accuracy": 8.0,
                    "source": "gps"
                })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            let text = &app.sms.deliveries()[0].text;
            assert!(text.contains("https://maps.google.com/?q=19.076000,72.877700"), "{text}");
        }

        #[tokio::test]
        async fn test_alert_without_location_uses_last_stored_point() {
            let app = setup();
            let id = create_trip(&app).await;
            post_location(&app, &id, 28.6139, 77.2090).await;

            let (status, _) = send(
                &app,
                "POST",
                &format!("/api/trips/{id}/alert"),
                Some(json!({ "rule": "PANIC_MOVEMENT_NIGHT", "latitude": 123.0, "longitude": 77.0 })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            let text = &app.sms.deliveries()[0].text;
            assert!(text.contains("https://maps.google.com/?q=28.613900,77.209000"), "{text}");
        }

        #[tokio::test]
        async fn test_alert_without_body_uses_manual_label() {
            let app = setup();
            let id = create_trip(&app).await;
            let (status, _) = send(&app, "POST", &format!("/api/trips/{id}/alert"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert!(app.sms.deliveries()[0].text.contains("MANUAL_ALERT"));
        }

        #[tokio::test]
        async fn test_alert_with_invalid_body_is_unprocessable() {
            let app = setup();
            let id = create_trip(&app).await;
            let req = Request::post(format!("/api/trips/{id}/alert"))
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap();
            let resp = app.router.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
            assert!(app.sms.deliveries().is_empty());
        }
    }

    mod service {
        use super::*;

        #[tokio::test]
        async fn test_health_endpoint() {
            let app = setup();
            let req = Request::get("/api/health").body(Body::empty()).unwrap();
            let resp = app.router.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);

            let json = body_json(resp).await;
            assert_eq!(json["status"], "healthy");
            assert_eq!(json["services"]["storage"], "in_memory");
            assert_eq!(json["services"]["sms"], "demo_mode");
            assert_eq!(json["services"]["geolocation"], "not_configured");
        }

        #[tokio::test]
        async fn test_metrics_endpoint() {
            let app = setup();
            create_trip(&app).await;
            send(&app, "GET", &format!("/api/trips/{}", uuid::Uuid::new_v4()), None).await;

            let req = Request::get("/metrics").body(Body::empty()).unwrap();
            let resp = app.router.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            let ct = resp
                .headers()
                .get("content-type")
                .unwrap()
                .to_str()
                .unwrap()
                .to_string();
            assert!(ct.starts_with("text/plain"));

            let bytes = resp.into_body().collect().await.unwrap().to_bytes();
            let text = String::from_utf8(bytes.to_vec()).unwrap();
            assert!(text.contains("nirbhay_active_trips 1"));
            assert!(text.contains("nirbhay_trips_created_total 1"));
            assert!(text.contains("nirbhay_http_errors_total 1"));
        }
    }
}
