//! The per-trip monitor actor.
//!
//! One task per trip owns every piece of trip state: the `Trip` aggregate, the
//! motion processor, location history, the risk engine and the escalation
//! machine. The outside world talks to it through a [`TripHandle`].
//!
//! ```text
//!   samples ──► MotionProcessor ──┐
//!                                 ├─► RiskEngine ──► EscalationMachine ──► AlertDispatcher
//!   fixes ────► LocationManager ──┘         ▲               │
//!                                           └── suspend / resume ┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use nirbhay_alerts::{Alert, AlertDispatcher, DispatchReport};
use nirbhay_config::NirbhayConfig;
use nirbhay_core::api::GuardianUpdate;
use nirbhay_core::{
    Event, EventBus, Guardians, LocationPoint, MotionReading, MotionState, NirbhayError, Result, RiskEvent, Trip,
    TripId,
};
use nirbhay_escalation::{CheckInput, CheckState, Countdown, CountdownTick, Effect, EscalationMachine, Outcome, Policy};
use nirbhay_risk::{RiskEngine, RiskWindow};
use nirbhay_sensing::{LocationManager, MotionProcessor, ProviderFix, SensorProvider, SensorStreams};

use crate::telemetry::Telemetry;

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const TICK_CHANNEL_CAPACITY: usize = 8;

/// Everything a monitor needs besides the trip itself.
pub struct MonitorDeps {
    pub config: NirbhayConfig,
    pub provider: Box<dyn SensorProvider>,
    pub dispatcher: Arc<dyn AlertDispatcher>,
    pub telemetry: Telemetry,
    pub events: EventBus,
}

/// Point-in-time view of a running trip.
#[derive(Debug, Clone, Serialize)]
pub struct TripSnapshot {
    pub trip: Trip,
    pub check: CheckState,
    pub session_id: Option<Uuid>,
    pub motion_state: MotionState,
    pub last_reading: Option<MotionReading>,
    pub last_location: Option<LocationPoint>,
    pub location_count: usize,
    pub last_risk: Option<RiskEvent>,
    pub sensing_suspended: bool,
}

enum Command {
    Answer(bool, oneshot::Sender<Result<CheckState>>),
    Code(String, oneshot::Sender<Result<CheckState>>),
    UpdateGuardians(GuardianUpdate, oneshot::Sender<Result<Guardians>>),
    Snapshot(oneshot::Sender<TripSnapshot>),
}

/// Cloneable handle to a running trip monitor.
#[derive(Clone)]
pub struct TripHandle {
    trip_id: TripId,
    commands: mpsc::Sender<Command>,
    done: watch::Receiver<Option<Trip>>,
    cancel: CancellationToken,
}

impl TripHandle {
    pub fn trip_id(&self) -> TripId {
        self.trip_id
    }

    /// Answer "are you safe?".
    pub async fn answer(&self, safe: bool) -> Result<CheckState> {
        self.request(|tx| Command::Answer(safe, tx)).await?
    }

    pub async fn enter_code(&self, code: impl Into<String>) -> Result<CheckState> {
        let code = code.into();
        self.request(|tx| Command::Code(code, tx)).await?
    }

    pub async fn update_guardians(&self, update: GuardianUpdate) -> Result<Guardians> {
        self.request(|tx| Command::UpdateGuardians(update, tx)).await?
    }

    pub async fn snapshot(&self) -> Result<TripSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// End the trip and wait for the monitor to shut down. An alert already
    /// being dispatched is allowed to finish first.
    pub async fn end(&self) -> Result<Trip> {
        self.cancel.cancel();
        self.wait().await
    }

    /// Wait until the monitor stops on its own (after an alert) or is ended.
    pub async fn wait(&self) -> Result<Trip> {
        let mut done = self.done.clone();
        let trip = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| NirbhayError::MonitorStopped)?;
        trip.clone().ok_or(NirbhayError::MonitorStopped)
    }

    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| NirbhayError::MonitorStopped)?;
        rx.await.map_err(|_| NirbhayError::MonitorStopped)
    }
}

/// The actor. Created by [`TripMonitor::start`], never shared.
pub struct TripMonitor {
    trip: Trip,
    config: NirbhayConfig,
    provider: Box<dyn SensorProvider>,
    dispatcher: Arc<dyn AlertDispatcher>,
    telemetry: Telemetry,
    events: EventBus,

    motion: MotionProcessor,
    location: LocationManager,
    readings: Vec<MotionReading>,
    engine: RiskEngine,
    last_risk: Option<RiskEvent>,
    /// Evidence before this instant is ignored (set when a check resolves safe).
    floor: Option<DateTime<Utc>>,

    machine: EscalationMachine,
    policy: Policy,
    countdown: Countdown,
    suspended: bool,
}

impl TripMonitor {
    /// Start sensing and spawn the actor.
    ///
    /// A provider that refuses permission stops the trip from starting. Any
    /// other provider failure is logged and the trip runs without that feed.
    pub async fn start(trip: Trip, mut deps: MonitorDeps) -> Result<TripHandle> {
        if !trip.is_active() {
            return Err(NirbhayError::TripNotActive(trip.id));
        }

        let streams = match deps.provider.start().await {
            Ok(streams) => streams,
            Err(e) if e.is_blocking() => {
                warn!(trip_id = %trip.id, error = %e, "trip cannot start");
                return Err(e);
            }
            Err(e) => {
                warn!(trip_id = %trip.id, provider = deps.provider.name(), error = %e, "sensor feed unavailable");
                closed_streams()
            }
        };

        deps.telemetry.trip_started(&trip).await;

        let (tick_tx, tick_rx) = mpsc::channel(TICK_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (done_tx, done_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let config = deps.config;
        let monitor = TripMonitor {
            motion: MotionProcessor::new(&config.motion),
            location: LocationManager::new(&config.location),
            readings: Vec::new(),
            engine: RiskEngine::new(&config.risk),
            last_risk: None,
            floor: None,
            machine: EscalationMachine::new(),
            policy: Policy::from(&config.escalation),
            countdown: Countdown::new(tick_tx),
            suspended: false,
            trip,
            config,
            provider: deps.provider,
            dispatcher: deps.dispatcher,
            telemetry: deps.telemetry,
            events: deps.events,
        };

        let handle = TripHandle {
            trip_id: monitor.trip.id,
            commands: command_tx,
            done: done_rx,
            cancel: cancel.clone(),
        };

        info!(
            trip_id = %monitor.trip.id,
            provider = monitor.provider.name(),
            guardians = monitor.trip.guardians.len(),
            telemetry = monitor.telemetry.port_name(),
            "trip monitor started"
        );
        monitor.events.publish(Event::TripStarted {
            trip_id: monitor.trip.id,
            guardians: monitor.trip.guardians.len(),
        });

        tokio::spawn(async move {
            let trip = monitor.run(streams, tick_rx, command_rx, cancel).await;
            done_tx.send_replace(Some(trip));
        });

        Ok(handle)
    }

    async fn run(
        mut self,
        mut streams: SensorStreams,
        mut ticks: mpsc::Receiver<CountdownTick>,
        mut commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> Trip {
        let eval_period = Duration::from_millis(self.config.motion.eval_interval_ms.max(1));
        let mut eval = tokio::time::interval_at(Instant::now() + eval_period, eval_period);
        eval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let poll_period = Duration::from_secs(self.config.location.fallback_poll_secs.max(1));
        let mut fallback = tokio::time::interval_at(Instant::now() + poll_period, poll_period);
        fallback.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut dispatch: Option<JoinHandle<DispatchReport>> = None;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                report = join_dispatch(&mut dispatch) => {
                    dispatch = None;
                    self.alert_dispatched(report);
                    break;
                }

                Some(cmd) = commands.recv() => {
                    if let Some(task) = self.command(cmd) {
                        dispatch = Some(task);
                    }
                }

                Some(tick) = ticks.recv() => {
                    if let Some(task) = self.countdown_tick(tick) {
                        dispatch = Some(task);
                    }
                }

                Some(sample) = streams.samples.recv() => {
                    if !self.suspended {
                        self.motion.ingest(&sample);
                    }
                }

                Some(fix) = streams.fixes.recv() => {
                    match fix {
                        ProviderFix::Fix { latitude, longitude, accuracy } => {
                            let point = self.location.on_fix(latitude, longitude, accuracy);
                            self.record_location(point);
                        }
                        ProviderFix::Unavailable => self.fallback_location(),
                    }
                    fallback.reset();
                }

                _ = fallback.tick() => self.fallback_location(),

                _ = eval.tick() => {
                    if let Some(task) = self.evaluate() {
                        dispatch = Some(task);
                    }
                }
            }
        }

        self.shutdown(dispatch).await
    }

    // ── Sensing ────────────────────────────────────────────────

    fn record_location(&mut self, point: LocationPoint) {
        self.events.publish(Event::LocationRecorded {
            trip_id: self.trip.id,
            source: point.source,
            accuracy: point.accuracy,
        });
        self.telemetry.location(self.trip.id, point);
    }

    /// No fix this period. Synthesize one near the last real fix, if any.
    fn fallback_location(&mut self) {
        match self.location.on_fix_unavailable() {
            Some(point) => self.record_location(point),
            None => self.events.publish(Event::NoLocationAvailable { trip_id: self.trip.id }),
        }
    }

    /// One evaluation tick: classify motion, then run the rules.
    fn evaluate(&mut self) -> Option<JoinHandle<DispatchReport>> {
        if self.suspended {
            return None;
        }

        if let Some(reading) = self.motion.evaluate() {
            if reading.panic_onset {
                info!(
                    trip_id = %self.trip.id,
                    accel_variance = reading.accel_variance,
                    gyro_variance = reading.gyro_variance,
                    "panic movement detected"
                );
                self.events.publish(Event::PanicOnset {
                    trip_id: self.trip.id,
                    accel_variance: reading.accel_variance,
                    gyro_variance: reading.gyro_variance,
                });
            }
            self.readings.push(reading);
            self.telemetry.motion(self.trip.id, reading);
        }

        let now = Local::now().fixed_offset();
        let cutoff = now.with_timezone(&Utc) - chrono::Duration::seconds(self.config.risk.window_secs as i64);
        self.readings.retain(|r| r.timestamp >= cutoff);

        let locations: Vec<LocationPoint> = self.location.history().cloned().collect();
        let window = RiskWindow::new(&self.readings, &locations, now).with_floor(self.floor);
        let risk = self.engine.evaluate(&window)?;

        self.events.publish(Event::RiskDetected {
            trip_id: self.trip.id,
            rule: risk.rule,
            confidence: risk.confidence,
        });
        self.last_risk = Some(risk.clone());

        let rule = risk.rule;
        match self.step(CheckInput::Risk(risk)) {
            Ok(task) => task,
            Err(e) => {
                debug!(trip_id = %self.trip.id, %rule, error = %e, "risk discarded");
                self.events.publish(Event::RiskDiscarded {
                    trip_id: self.trip.id,
                    rule,
                });
                None
            }
        }
    }

    // ── Escalation ─────────────────────────────────────────────

    fn countdown_tick(&mut self, tick: CountdownTick) -> Option<JoinHandle<DispatchReport>> {
        if tick.generation != self.machine.generation {
            debug!(trip_id = %self.trip.id, generation = tick.generation, "stale countdown tick dropped");
            return None;
        }
        if let Some(session) = &self.machine.session {
            self.events.publish(Event::CountdownTick {
                trip_id: self.trip.id,
                session_id: session.id,
                remaining_secs: tick.remaining,
            });
        }
        match self.step(CheckInput::Tick {
            generation: tick.generation,
        }) {
            Ok(task) => task,
            Err(e) => {
                warn!(trip_id = %self.trip.id, error = %e, "countdown tick rejected");
                None
            }
        }
    }

    /// Feed one input to the machine and carry out its effects.
    fn step(&mut self, input: CheckInput) -> Result<Option<JoinHandle<DispatchReport>>> {
        let transition = self.machine.step(&input, &self.policy)?;
        let opened = !self.machine.is_open() && transition.next.is_open();
        self.machine = transition.next;

        if opened {
            if let Some(session) = &self.machine.session {
                info!(
                    trip_id = %self.trip.id,
                    session_id = %session.id,
                    rule = %session.risk.rule,
                    "safety check started"
                );
                self.events.publish(Event::SafetyCheckStarted {
                    trip_id: self.trip.id,
                    session_id: session.id,
                    countdown_secs: self.policy.countdown_secs,
                });
            }
        }

        if let Some(outcome) = transition.outcome {
            let session_id = self.machine.session.as_ref().map(|s| s.id).unwrap_or_default();
            let reason = match outcome {
                Outcome::Safe => "confirmed safe".to_string(),
                Outcome::Alerting(reason) => reason.to_string(),
                Outcome::Cancelled => "trip ended".to_string(),
            };
            info!(trip_id = %self.trip.id, %session_id, ?outcome, "safety check resolved");
            self.events.publish(Event::SafetyCheckResolved {
                trip_id: self.trip.id,
                session_id,
                safe: outcome == Outcome::Safe,
                reason,
            });
        }

        Ok(self.apply(transition.effects))
    }

    fn apply(&mut self, effects: Vec<Effect>) -> Option<JoinHandle<DispatchReport>> {
        let mut dispatch = None;
        for effect in effects {
            match effect {
                Effect::SuspendSensing => self.suspended = true,
                Effect::Vibrate => info!(trip_id = %self.trip.id, "vibrate"),
                Effect::StartCountdown { generation, secs } => self.countdown.start(generation, secs),
                Effect::CancelCountdown { generation } => {
                    if self.countdown.running() == Some(generation) {
                        self.countdown.cancel();
                    }
                }
                Effect::DispatchAlert { risk, reason } => {
                    info!(trip_id = %self.trip.id, rule = %risk.rule, %reason, "dispatching alert");
                    let alert = Alert::from_risk(self.trip.id, &risk).with_location(self.location.last().cloned());
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let trip = self.trip.clone();
                    dispatch = Some(tokio::spawn(async move { dispatcher.dispatch(&trip, &alert).await }));
                }
                Effect::ResumeMonitoring => {
                    self.suspended = false;
                    self.motion.reset();
                    self.readings.clear();
                    self.floor = Some(Utc::now());
                    info!(trip_id = %self.trip.id, "monitoring resumed");
                }
            }
        }
        dispatch
    }

    fn alert_dispatched(&mut self, report: DispatchReport) {
        self.trip.mark_alert();
        info!(
            trip_id = %self.trip.id,
            push_sent = report.push_sent,
            sms_sent = report.sms_sent,
            "alert dispatch finished"
        );
        self.events.publish(Event::AlertDispatched {
            trip_id: self.trip.id,
            push_sent: report.push_sent,
            sms_sent: report.sms_sent,
        });
    }

    // ── Commands ───────────────────────────────────────────────

    fn command(&mut self, cmd: Command) -> Option<JoinHandle<DispatchReport>> {
        match cmd {
            Command::Answer(safe, reply) => {
                let (result, task) = self.user_input(CheckInput::Answer(safe));
                let _ = reply.send(result);
                task
            }
            Command::Code(code, reply) => {
                let (result, task) = self.user_input(CheckInput::Code(code));
                let _ = reply.send(result);
                task
            }
            Command::UpdateGuardians(update, reply) => {
                let result = update.apply(&mut self.trip.guardians).map(|()| self.trip.guardians.clone());
                if result.is_ok() {
                    info!(trip_id = %self.trip.id, guardians = self.trip.guardians.len(), "guardians updated");
                    self.telemetry.guardians_updated(self.trip.id, update);
                }
                let _ = reply.send(result);
                None
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
                None
            }
        }
    }

    fn user_input(&mut self, input: CheckInput) -> (Result<CheckState>, Option<JoinHandle<DispatchReport>>) {
        match self.step(input) {
            Ok(task) => (Ok(self.machine.state), task),
            Err(e) => (Err(e), None),
        }
    }

    fn snapshot(&self) -> TripSnapshot {
        TripSnapshot {
            trip: self.trip.clone(),
            check: self.machine.state,
            session_id: self.machine.session.as_ref().map(|s| s.id),
            motion_state: self.motion.state(),
            last_reading: self.readings.last().copied(),
            last_location: self.location.last().cloned(),
            location_count: self.location.len(),
            last_risk: self.last_risk.clone(),
            sensing_suspended: self.suspended,
        }
    }

    // ── Shutdown ───────────────────────────────────────────────

    async fn shutdown(mut self, dispatch: Option<JoinHandle<DispatchReport>>) -> Trip {
        if self.machine.is_open() {
            if let Err(e) = self.step(CheckInput::Cancel) {
                warn!(trip_id = %self.trip.id, error = %e, "could not cancel safety check");
            }
        }
        self.countdown.cancel();

        if let Some(task) = dispatch {
            let report = task.await.unwrap_or_else(|e| {
                warn!(trip_id = %self.trip.id, error = %e, "alert dispatch task failed");
                DispatchReport::default()
            });
            self.alert_dispatched(report);
        }

        if let Err(e) = self.provider.stop().await {
            warn!(trip_id = %self.trip.id, error = %e, "provider stop failed");
        }

        if self.trip.is_active() {
            self.trip.end();
            self.telemetry.trip_ended(self.trip.id);
        }

        info!(trip_id = %self.trip.id, status = %self.trip.status, "trip monitor stopped");
        self.events.publish(Event::TripEnded {
            trip_id: self.trip.id,
            status: self.trip.status,
        });
        self.trip
    }
}

/// Resolve when the in-flight dispatch finishes. Pending forever when there is none.
async fn join_dispatch(task: &mut Option<JoinHandle<DispatchReport>>) -> DispatchReport {
    match task.as_mut() {
        Some(handle) => handle.await.unwrap_or_else(|e| {
            warn!(error = %e, "alert dispatch task failed");
            DispatchReport::default()
        }),
        None => std::future::pending().await,
    }
}

/// Streams whose senders are already gone. `recv` yields `None` immediately,
/// which disables the matching select branches.
fn closed_streams() -> SensorStreams {
    let (_, samples) = mpsc::channel(1);
    let (_, fixes) = mpsc::channel(1);
    SensorStreams { samples, fixes }
}
