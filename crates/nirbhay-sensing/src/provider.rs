//! Sensor provider capability.
//!
//! A provider owns the platform side of sensing: it delivers raw motion
//! samples and position fixes over bounded channels and can be stopped
//! deterministically. Two variants exist: [`ExternalFeedProvider`] is fed by
//! the host device, [`SimulatedProvider`] synthesizes a scripted journey.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use nirbhay_core::{MotionSample, NirbhayError, Result, SensorKind, geo};

/// Bounded channel capacity for motion samples (~5 s at 20 Hz).
pub const SAMPLE_CHANNEL_CAPACITY: usize = 128;
/// Bounded channel capacity for position reports.
pub const FIX_CHANNEL_CAPACITY: usize = 16;

/// What the positioning subsystem reported for one period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProviderFix {
    Fix { latitude: f64, longitude: f64, accuracy: f64 },
    /// The platform tried and produced no fix.
    Unavailable,
}

/// Receivers handed to the trip monitor on `start`.
#[derive(Debug)]
pub struct SensorStreams {
    pub samples: mpsc::Receiver<MotionSample>,
    pub fixes: mpsc::Receiver<ProviderFix>,
}

/// Trait implemented by each sensor source.
#[async_trait]
pub trait SensorProvider: Send + Sync {
    /// Provider name for logs (e.g. "device", "simulated").
    fn name(&self) -> &str;

    /// Begin delivering samples. Fails with `PermissionDenied` when the
    /// platform refuses motion or location access.
    async fn start(&mut self) -> Result<SensorStreams>;

    /// Stop delivering. Idempotent.
    async fn stop(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;
}

// ── External feed ──────────────────────────────────────────────

/// Permission state as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub motion: bool,
    pub location: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            motion: true,
            location: true,
        }
    }
}

/// Provider fed by the host device through a [`FeedHandle`].
pub struct ExternalFeedProvider {
    permissions: Permissions,
    pending: Option<SensorStreams>,
    cancel: CancellationToken,
    running: bool,
}

/// Cloneable sender side of an [`ExternalFeedProvider`]. Sends never block:
/// when a channel is full the newest value is dropped.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    samples: mpsc::Sender<MotionSample>,
    fixes: mpsc::Sender<ProviderFix>,
    cancel: CancellationToken,
}

impl ExternalFeedProvider {
    pub fn new(permissions: Permissions) -> (Self, FeedHandle) {
        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        let (fix_tx, fix_rx) = mpsc::channel(FIX_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let provider = Self {
            permissions,
            pending: Some(SensorStreams {
                samples: sample_rx,
                fixes: fix_rx,
            }),
            cancel: cancel.clone(),
            running: false,
        };
        let handle = FeedHandle {
            samples: sample_tx,
            fixes: fix_tx,
            cancel,
        };
        (provider, handle)
    }
}

#[async_trait]
impl SensorProvider for ExternalFeedProvider {
    fn name(&self) -> &str {
        "device"
    }

    async fn start(&mut self) -> Result<SensorStreams> {
        if !self.permissions.location {
            return Err(NirbhayError::PermissionDenied("location".into()));
        }
        if !self.permissions.motion {
            return Err(NirbhayError::PermissionDenied("motion".into()));
        }
        let streams = self
            .pending
            .take()
            .ok_or_else(|| NirbhayError::SensorUnavailable("device feed already started".into()))?;
        self.running = true;
        info!(provider = "device", "sensor feed started");
        Ok(streams)
    }

    async fn stop(&mut self) -> Result<()> {
        if self.running {
            info!(provider = "device", "sensor feed stopped");
        }
        self.cancel.cancel();
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

impl FeedHandle {
    /// Push one raw sample. Returns false when dropped or the feed is stopped.
    pub fn push_sample(&self, sample: MotionSample) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match self.samples.try_send(sample) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "motion sample dropped");
                false
            }
        }
    }

    pub fn push_fix(&self, latitude: f64, longitude: f64, accuracy: f64) -> bool {
        self.push(ProviderFix::Fix {
            latitude,
            longitude,
            accuracy,
        })
    }

    /// The platform reported that no fix could be obtained.
    pub fn report_unavailable(&self) -> bool {
        self.push(ProviderFix::Unavailable)
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn push(&self, fix: ProviderFix) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.fixes.try_send(fix).is_ok()
    }
}

// ── Simulated journey ──────────────────────────────────────────

/// What the simulated traveller is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scenario {
    /// Steady travel with smooth motion and good GPS.
    #[default]
    Calm,
    /// Violent motion and an abrupt halt.
    Panic,
    /// Smooth motion, position fixes stop arriving.
    GpsLoss,
    /// Stationary with smooth motion.
    Stopped,
}

impl std::str::FromStr for Scenario {
    type Err = NirbhayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "calm" => Ok(Self::Calm),
            "panic" => Ok(Self::Panic),
            "gps-loss" | "gps_loss" => Ok(Self::GpsLoss),
            "stopped" => Ok(Self::Stopped),
            other => Err(NirbhayError::Config(format!("unknown scenario '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub start_latitude: f64,
    pub start_longitude: f64,
    /// Travel speed in the calm scenario (m/s).
    pub speed_mps: f64,
    pub sample_interval: Duration,
    pub fix_interval: Duration,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            start_latitude: 28.6139,
            start_longitude: 77.2090,
            speed_mps: 8.0,
            sample_interval: Duration::from_millis(50),
            fix_interval: Duration::from_secs(5),
        }
    }
}

/// Provider that synthesizes a journey. The scenario can be switched while running.
pub struct SimulatedProvider {
    settings: SimulationSettings,
    scenario_tx: watch::Sender<Scenario>,
    cancel: CancellationToken,
    running: bool,
}

impl SimulatedProvider {
    pub fn new(settings: SimulationSettings, scenario: Scenario) -> Self {
        let (scenario_tx, _) = watch::channel(scenario);
        Self {
            settings,
            scenario_tx,
            cancel: CancellationToken::new(),
            running: false,
        }
    }

    pub fn set_scenario(&self, scenario: Scenario) {
        info!(?scenario, "simulation scenario changed");
        self.scenario_tx.send_replace(scenario);
    }

    /// A sender for switching scenarios from elsewhere (e.g. a CLI prompt task).
    pub fn scenario_control(&self) -> watch::Sender<Scenario> {
        self.scenario_tx.clone()
    }

    pub fn scenario(&self) -> Scenario {
        *self.scenario_tx.borrow()
    }
}

/// Uniform noise in `[-amplitude, amplitude)`.
fn noise(amplitude: f64) -> f64 {
    (rand::random::<f64>() * 2.0 - 1.0) * amplitude
}

/// One synthetic accelerometer or gyroscope reading for the scenario.
pub fn synthesize_sample(kind: SensorKind, scenario: Scenario) -> MotionSample {
    let violent = scenario == Scenario::Panic;
    match kind {
        SensorKind::Accelerometer => {
            let a = if violent { 15.0 } else { 0.3 };
            MotionSample::new(kind, noise(a), noise(a), 9.81 + noise(a))
        }
        SensorKind::Gyroscope => {
            let a = if violent { 8.0 } else { 0.05 };
            MotionSample::new(kind, noise(a), noise(a), noise(a))
        }
    }
}

#[async_trait]
impl SensorProvider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn start(&mut self) -> Result<SensorStreams> {
        if self.running {
            return Err(NirbhayError::SensorUnavailable("simulation already running".into()));
        }
        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        let (fix_tx, fix_rx) = mpsc::channel(FIX_CHANNEL_CAPACITY);
        self.cancel = CancellationToken::new();
        self.running = true;

        let cancel = self.cancel.clone();
        let settings = self.settings.clone();
        let scenario = self.scenario_tx.subscribe();

        tokio::spawn(async move {
            let mut sample_tick = tokio::time::interval(settings.sample_interval);
            let mut fix_tick = tokio::time::interval(settings.fix_interval);
            let (mut lat, mut lon) = (settings.start_latitude, settings.start_longitude);
            let mut heading = rand::random::<f64>() * std::f64::consts::TAU;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sample_tick.tick() => {
                        let current = *scenario.borrow();
                        for kind in [SensorKind::Accelerometer, SensorKind::Gyroscope] {
                            // Full channel: drop, the ring buffer only wants recent data anyway.
                            let _ = sample_tx.try_send(synthesize_sample(kind, current));
                        }
                    }
                    _ = fix_tick.tick() => {
                        let current = *scenario.borrow();
                        let report = match current {
                            Scenario::GpsLoss => ProviderFix::Unavailable,
                            Scenario::Calm => {
                                let step = settings.speed_mps * settings.fix_interval.as_secs_f64();
                                heading += noise(0.2);
                                (lat, lon) = geo::offset(lat, lon, step * heading.cos(), step * heading.sin());
                                ProviderFix::Fix { latitude: lat, longitude: lon, accuracy: 5.0 + 10.0 * rand::random::<f64>() }
                            }
                            Scenario::Panic | Scenario::Stopped => {
                                ProviderFix::Fix { latitude: lat, longitude: lon, accuracy: 5.0 + 10.0 * rand::random::<f64>() }
                            }
                        };
                        if fix_tx.send(report).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("simulation task exited");
        });

        info!(provider = "simulated", scenario = ?self.scenario(), "sensor feed started");
        Ok(SensorStreams {
            samples: sample_rx,
            fixes: fix_rx,
        })
    }

    async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        if self.running {
            info!(provider = "simulated", "sensor feed stopped");
        }
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
