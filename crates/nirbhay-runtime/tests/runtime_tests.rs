#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use nirbhay_alerts::{GatewayDispatcher, SimulatedGateway};
    use nirbhay_config::NirbhayConfig;
    use nirbhay_core::{Event, EventBus, Guardians, MotionSample, SensorKind, Trip};
    use nirbhay_runtime::{MonitorDeps, Telemetry, TripHandle, TripMonitor};
    use nirbhay_sensing::{ExternalFeedProvider, FeedHandle, Permissions};
    use tokio::sync::broadcast;

    const LAT: f64 = 28.6139;
    const LON: f64 = 77.2090;

    fn trip() -> Trip {
        let guardians = Guardians::from_phones(Some("+919876543210"), Some("9876543211"), None, None).unwrap();
        Trip::new("default_user", guardians)
    }

    struct Harness {
        handle: TripHandle,
        feed: FeedHandle,
        events: broadcast::Receiver<Event>,
        sms: SimulatedGateway,
    }

    async fn start(config: NirbhayConfig) -> Harness {
        let (provider, feed) = ExternalFeedProvider::new(Permissions::default());
        let sms = SimulatedGateway::new();
        let dispatcher =
            GatewayDispatcher::new(Arc::new(sms.clone()), Arc::new(SimulatedGateway::new()), &config.alerts);
        let bus = EventBus::default();
        let events = bus.subscribe();
        let deps = MonitorDeps {
            config,
            provider: Box::new(provider),
            dispatcher: Arc::new(dispatcher),
            telemetry: Telemetry::disabled(),
            events: bus,
        };
        let handle = TripMonitor::start(trip(), deps).await.unwrap();
        Harness {
            handle,
            feed,
            events,
            sms,
        }
    }

    /// Alternating magnitudes giving accel variance 16 and gyro variance 6.
    fn push_panic_motion(feed: &FeedHandle) {
        let gyro_high = 1.0 + 2.0 * 6f64.sqrt();
        for i in 0..20 {
            let (a, g) = if i % 2 == 0 { (16.0, 1.0) } else { (24.0, gyro_high) };
            assert!(feed.push_sample(MotionSample::new(SensorKind::Accelerometer, a, 0.0, 0.0)));
            assert!(feed.push_sample(MotionSample::new(SensorKind::Gyroscope, g, 0.0, 0.0)));
        }
    }

    fn push_calm_motion(feed: &FeedHandle) {
        for _ in 0..20 {
            feed.push_sample(MotionSample::new(SensorKind::Accelerometer, 0.0, 0.0, 9.81));
            feed.push_sample(MotionSample::new(SensorKind::Gyroscope, 0.01, 0.0, 0.0));
        }
    }

    /// Two fixes at the same spot: the traveller has stopped.
    fn push_stop(feed: &FeedHandle) {
        assert!(feed.push_fix(LAT, LON, 5.0));
        assert!(feed.push_fix(LAT, LON, 5.0));
    }

    async fn next_event(rx: &mut broadcast::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
        tokio::time::timeout(Duration::from_secs(120), async {
            loop {
                match rx.recv().await {
                    Ok(e) if pred(&e) => return e,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
                }
            }
        })
        .await
        .expect("expected event was not published")
    }

    fn safety_code_config() -> NirbhayConfig {
        let mut config = NirbhayConfig::default();
        config.escalation.safety_code = Some("1234".into());
        config
    }

    mod escalation {
        use super::*;
        use nirbhay_core::{NirbhayError, RiskRuleId, TripStatus};
        use nirbhay_escalation::{CheckState, Outcome};

        #[tokio::test(start_paused = true)]
        async fn test_unanswered_check_dispatches_alert() {
            let mut h = start(NirbhayConfig::default()).await;
            push_stop(&h.feed);
            push_panic_motion(&h.feed);

            let risk = next_event(&mut h.events, |e| matches!(e, Event::RiskDetected { .. })).await;
            assert!(matches!(
                risk,
                Event::RiskDetected {
                    rule: RiskRuleId::PanicMovementAbnormalStop,
                    ..
                }
            ));
            next_event(&mut h.events, |e| matches!(e, Event::SafetyCheckStarted { countdown_secs: 20, .. })).await;

            let resolved = next_event(&mut h.events, |e| matches!(e, Event::SafetyCheckResolved { .. })).await;
            assert!(matches!(resolved, Event::SafetyCheckResolved { safe: false, .. }));
            let sent = next_event(&mut h.events, |e| matches!(e, Event::AlertDispatched { .. })).await;
            assert!(matches!(sent, Event::AlertDispatched { sms_sent: true, .. }));

            let trip = h.handle.wait().await.unwrap();
            assert_eq!(trip.status, TripStatus::Alert);
            assert!(trip.end_time.is_some());

            let texts = h.sms.deliveries();
            assert_eq!(texts.len(), 2);
            assert!(texts[0].text.contains("PANIC_MOVEMENT_ABNORMAL_STOP"));
            assert!(texts[0].text.contains("maps.google.com"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_yes_and_correct_code_resumes_monitoring() {
            let mut h = start(safety_code_config()).await;
            push_stop(&h.feed);
            push_panic_motion(&h.feed);
            next_event(&mut h.events, |e| matches!(e, Event::SafetyCheckStarted { .. })).await;

            let state = h.handle.answer(true).await.unwrap();
            assert!(matches!(state, CheckState::CodeEntry { remaining: 20 }));
            let state = h.handle.enter_code("1234").await.unwrap();
            assert_eq!(state, CheckState::Resolved { outcome: Outcome::Safe });

            let snap = h.handle.snapshot().await.unwrap();
            assert!(snap.trip.is_active());
            assert!(!snap.sensing_suspended);

            // The stop that triggered the check is not evidence any more.
            push_calm_motion(&h.feed);
            tokio::time::sleep(Duration::from_secs(30)).await;
            let snap = h.handle.snapshot().await.unwrap();
            assert_eq!(snap.check, CheckState::Resolved { outcome: Outcome::Safe });
            assert!(snap.trip.is_active());

            let trip = h.handle.end().await.unwrap();
            assert_eq!(trip.status, TripStatus::Ended);
            assert!(h.sms.deliveries().is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn test_wrong_code_alerts_without_retry() {
            let mut h = start(safety_code_config()).await;
            push_stop(&h.feed);
            push_panic_motion(&h.feed);
            next_event(&mut h.events, |e| matches!(e, Event::SafetyCheckStarted { .. })).await;

            h.handle.answer(true).await.unwrap();
            let state = h.handle.enter_code("0000").await.unwrap();
            assert!(matches!(
                state,
                CheckState::Resolved {
                    outcome: Outcome::Alerting(_)
                }
            ));

            let trip = h.handle.wait().await.unwrap();
            assert_eq!(trip.status, TripStatus::Alert);
            assert_eq!(h.sms.deliveries().len(), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn test_ending_during_check_dispatches_nothing() {
            let mut h = start(NirbhayConfig::default()).await;
            push_stop(&h.feed);
            push_panic_motion(&h.feed);
            next_event(&mut h.events, |e| matches!(e, Event::SafetyCheckStarted { .. })).await;

            let trip = h.handle.end().await.unwrap();
            assert_eq!(trip.status, TripStatus::Ended);

            let resolved = next_event(&mut h.events, |e| matches!(e, Event::SafetyCheckResolved { .. })).await;
            assert!(matches!(resolved, Event::SafetyCheckResolved { safe: false, .. }));
            tokio::time::sleep(Duration::from_secs(30)).await;
            assert!(h.sms.deliveries().is_empty());
            assert!(h.feed.is_stopped());
        }

        #[tokio::test(start_paused = true)]
        async fn test_answer_without_open_check_is_refused() {
            let h = start(NirbhayConfig::default()).await;
            let err = h.handle.answer(true).await.unwrap_err();
            assert!(matches!(err, NirbhayError::NoOpenSession));
            h.handle.end().await.unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn test_commands_after_end_report_stopped_monitor() {
            let h = start(NirbhayConfig::default()).await;
            h.handle.end().await.unwrap();
            assert!(h.handle.is_finished());
            let err = h.handle.snapshot().await.unwrap_err();
            assert!(matches!(err, NirbhayError::MonitorStopped));
        }
    }

    mod sensing {
        use super::*;
        use nirbhay_core::api::GuardianUpdate;
        use nirbhay_core::{LocationSource, NirbhayError};

        #[tokio::test(start_paused = true)]
        async fn test_permission_denied_blocks_start() {
            let (provider, _feed) = ExternalFeedProvider::new(Permissions {
                motion: true,
                location: false,
            });
            let deps = MonitorDeps {
                config: NirbhayConfig::default(),
                provider: Box::new(provider),
                dispatcher: Arc::new(GatewayDispatcher::from_config(&NirbhayConfig::default())),
                telemetry: Telemetry::disabled(),
                events: EventBus::default(),
            };
            let result = TripMonitor::start(trip(), deps).await;
            assert!(matches!(result, Err(NirbhayError::PermissionDenied(_))));
        }

        #[tokio::test(start_paused = true)]
        async fn test_no_fix_ever_reports_no_location() {
            let mut h = start(NirbhayConfig::default()).await;
            assert!(h.feed.report_unavailable());
            next_event(&mut h.events, |e| matches!(e, Event::NoLocationAvailable { .. })).await;

            let snap = h.handle.snapshot().await.unwrap();
            assert_eq!(snap.location_count, 0);
            assert!(snap.trip.is_active());
            h.handle.end().await.unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn test_silence_produces_fallback_point() {
            let mut h = start(NirbhayConfig::default()).await;
            assert!(h.feed.push_fix(LAT, LON, 8.0));
            next_event(&mut h.events, |e| {
                matches!(e, Event::LocationRecorded { source: LocationSource::Gps, .. })
            })
            .await;

            let fallback = next_event(&mut h.events, |e| {
                matches!(e, Event::LocationRecorded { source: LocationSource::Fallback, .. })
            })
            .await;
            let Event::LocationRecorded { accuracy, .. } = fallback else {
                unreachable!()
            };
            assert!((80.0..=100.0).contains(&accuracy));

            let snap = h.handle.snapshot().await.unwrap();
            let last = snap.last_location.unwrap();
            assert_eq!(last.source, LocationSource::Fallback);
            assert!(nirbhay_core::geo::haversine_m(LAT, LON, last.latitude, last.longitude) <= 10.05);
            h.handle.end().await.unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn test_calm_travel_raises_nothing() {
            let mut h = start(NirbhayConfig::default()).await;
            push_calm_motion(&h.feed);
            let mut lat = LAT;
            for _ in 0..4 {
                h.feed.push_fix(lat, LON, 6.0);
                lat += 0.0004;
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            let snap = h.handle.snapshot().await.unwrap();
            assert!(snap.last_risk.is_none());
            assert_eq!(snap.location_count, 4);
            h.handle.end().await.unwrap();
            while let Ok(e) = h.events.try_recv() {
                assert!(!matches!(e, Event::SafetyCheckStarted { .. }));
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_guardian_update_applies_to_trip() {
            let h = start(NirbhayConfig::default()).await;
            let updated = h
                .handle
                .update_guardians(GuardianUpdate {
                    guardian_phone_3: Some("9876500000".into()),
                    ..GuardianUpdate::default()
                })
                .await
                .unwrap();
            assert_eq!(updated.len(), 3);

            let err = h
                .handle
                .update_guardians(GuardianUpdate {
                    guardian_phone: Some("not a phone".into()),
                    ..GuardianUpdate::default()
                })
                .await
                .unwrap_err();
            assert!(matches!(err, NirbhayError::InvalidGuardians(_)));
            let trip = h.handle.end().await.unwrap();
            assert_eq!(trip.guardians.len(), 3);
        }
    }

    mod backend {
        use super::*;
        use axum::extract::{Path, State};
        use axum::routing::post;
        use axum::{Json, Router};
        use nirbhay_alerts::{Alert, AlertDispatcher, DispatchReport};
        use nirbhay_core::api::{AlertRequest, CreateTripRequest, MotionAccepted, MotionSubmission, TripCreated};
        use nirbhay_core::{LocationPoint, LocationSource, MotionReading, MotionState, TripStatus};
        use nirbhay_runtime::{BackendClient, BackendDispatcher};
        use parking_lot::Mutex;
        use uuid::Uuid;

        type Seen = Arc<Mutex<Vec<String>>>;

        async fn create(State(seen): State<Seen>, Json(req): Json<CreateTripRequest>) -> Json<TripCreated> {
            seen.lock().push(format!("create {}", req.guardian_phone.unwrap_or_default()));
            Json(TripCreated {
                trip_id: Uuid::nil(),
                user_id: req.user_id,
                status: TripStatus::Active,
                start_time: chrono::Utc::now(),
                guardian_count: 2,
            })
        }

        async fn motion(
            State(seen): State<Seen>,
            Path(id): Path<Uuid>,
            Json(req): Json<MotionSubmission>,
        ) -> Json<MotionAccepted> {
            seen.lock().push(format!("motion {id}"));
            Json(MotionAccepted {
                message: "Motion data received".into(),
                motion_id: Uuid::new_v4(),
                is_panic: req.accel_variance > 2.0,
            })
        }

        async fn alert(
            State(seen): State<Seen>,
            Path(id): Path<Uuid>,
            Json(req): Json<AlertRequest>,
        ) -> Json<DispatchReport> {
            let at = req
                .location()
                .map(|p| format!("{:.4},{:.4}", p.latitude, p.longitude))
                .unwrap_or_default();
            seen.lock().push(format!("alert {id} {at}"));
            Json(DispatchReport {
                push_sent: false,
                sms_sent: true,
            })
        }

        async fn serve() -> (String, Seen) {
            let seen: Seen = Arc::default();
            let app = Router::new()
                .route("/api/trips", post(create))
                .route("/api/trips/{id}/motion", post(motion))
                .route("/api/trips/{id}/alert", post(alert))
                .with_state(seen.clone());
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            (format!("http://{addr}/"), seen)
        }

        fn reading(accel: f64) -> MotionReading {
            MotionReading {
                accel_variance: accel,
                gyro_variance: 0.1,
                state: MotionState::Normal,
                panic_onset: false,
                timestamp: chrono::Utc::now(),
            }
        }

        #[tokio::test]
        async fn test_calls_use_backend_trip_id() {
            let (url, seen) = serve().await;
            let client = BackendClient::new(&url, Duration::from_secs(5));
            let trip = trip();

            client.create_trip(&trip).await.unwrap();
            assert_eq!(client.remote_id(trip.id), Some(Uuid::nil()));

            // Disagreeing verdicts are only logged.
            let accepted = client.submit_motion(trip.id, &reading(3.0)).await.unwrap();
            assert!(accepted.is_panic);

            let seen = seen.lock();
            assert_eq!(seen[0], "create +919876543210");
            assert_eq!(seen[1], format!("motion {}", Uuid::nil()));
        }

        #[tokio::test]
        async fn test_unregistered_trip_is_refused() {
            let (url, seen) = serve().await;
            let client = BackendClient::new(&url, Duration::from_secs(5));
            let err = client.submit_motion(Uuid::new_v4(), &reading(0.1)).await.unwrap_err();
            assert!(err.to_string().contains("not registered"));
            assert!(seen.lock().is_empty());
        }

        /// Direct-to-gateway dispatcher used when the backend fails, plus its SMS sink.
        fn direct() -> (Arc<dyn AlertDispatcher>, SimulatedGateway) {
            let sms = SimulatedGateway::new();
            let dispatcher = GatewayDispatcher::new(
                Arc::new(sms.clone()),
                Arc::new(SimulatedGateway::new()),
                &NirbhayConfig::default().alerts,
            );
            (Arc::new(dispatcher), sms)
        }

        #[tokio::test]
        async fn test_backend_dispatcher_reports_server_result() {
            let (url, seen) = serve().await;
            let client = Arc::new(BackendClient::new(&url, Duration::from_secs(5)));
            let trip = trip();
            client.create_trip(&trip).await.unwrap();

            let (fallback, sms) = direct();
            let dispatcher = BackendDispatcher::new(client, fallback);
            let here = LocationPoint::new(LAT, LON, 6.0, LocationSource::Gps);
            let report = dispatcher.dispatch(&trip, &Alert::test(trip.id, Some(here))).await;
            assert_eq!(
                report,
                DispatchReport {
                    push_sent: false,
                    sms_sent: true
                }
            );
            assert_eq!(seen.lock().last().unwrap(), &format!("alert {} 28.6139,77.2090", Uuid::nil()));
            assert!(sms.deliveries().is_empty());
        }

        #[tokio::test]
        async fn test_unreachable_backend_alerts_directly() {
            let client = Arc::new(BackendClient::new("http://127.0.0.1:9", Duration::from_secs(2)));
            let (fallback, sms) = direct();
            let dispatcher = BackendDispatcher::new(client, fallback);
            let trip = trip();
            let here = LocationPoint::new(LAT, LON, 6.0, LocationSource::Gps);
            let report = dispatcher.dispatch(&trip, &Alert::test(trip.id, Some(here))).await;
            assert!(report.sms_sent);
            let texts = sms.deliveries();
            assert_eq!(texts.len(), 2);
            assert!(texts[0].text.contains("maps.google.com"));
        }

        #[tokio::test]
        async fn test_unregistered_trip_alerts_directly() {
            let (url, seen) = serve().await;
            let client = Arc::new(BackendClient::new(&url, Duration::from_secs(5)));
            let (fallback, sms) = direct();
            let dispatcher = BackendDispatcher::new(client, fallback);
            let trip = trip();
            let report = dispatcher.dispatch(&trip, &Alert::test(trip.id, None)).await;
            assert!(report.sms_sent);
            assert_eq!(sms.deliveries().len(), 2);
            assert!(seen.lock().is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn test_alert_reaches_guardians_when_registration_failed() {
            let client = Arc::new(BackendClient::new("http://127.0.0.1:9", Duration::from_secs(2)));
            let (fallback, sms) = direct();
            let (provider, feed) = ExternalFeedProvider::new(Permissions::default());
            let bus = EventBus::default();
            let mut events = bus.subscribe();
            let deps = MonitorDeps {
                config: NirbhayConfig::default(),
                provider: Box::new(provider),
                dispatcher: Arc::new(BackendDispatcher::new(client.clone(), fallback)),
                telemetry: Telemetry::new(client.clone(), Duration::from_secs(2)),
                events: bus,
            };
            let trip = trip();
            let handle = TripMonitor::start(trip.clone(), deps).await.unwrap();
            assert_eq!(client.remote_id(trip.id), None);

            push_stop(&feed);
            push_panic_motion(&feed);
            let sent = next_event(&mut events, |e| matches!(e, Event::AlertDispatched { .. })).await;
            assert!(matches!(sent, Event::AlertDispatched { sms_sent: true, .. }));

            let ended = handle.wait().await.unwrap();
            assert_eq!(ended.status, TripStatus::Alert);
            let texts = sms.deliveries();
            assert_eq!(texts.len(), 2);
            assert!(texts[0].text.contains("maps.google.com"));
        }

        #[test]
        fn test_connect_without_backend_alerts_directly() {
            let (telemetry, _dispatcher) = nirbhay_runtime::connect(&NirbhayConfig::default());
            assert_eq!(telemetry.port_name(), "none");
        }

        #[tokio::test]
        async fn test_connect_with_backend_reports_to_it() {
            let mut config = NirbhayConfig::default();
            config.services.backend_url = Some("http://127.0.0.1:8001".into());
            let (telemetry, _dispatcher) = nirbhay_runtime::connect(&config);
            assert_eq!(telemetry.port_name(), "backend");
        }
    }
}
