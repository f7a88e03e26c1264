//! Rolling-window motion classification.
//!
//! Raw accelerometer and gyroscope samples are reduced to their Euclidean
//! magnitude and kept in one bounded ring buffer per sensor. Each evaluation
//! tick computes the population variance of both windows and classifies the
//! window as panic when both exceed their thresholds.

use std::collections::VecDeque;

use chrono::Utc;
use tracing::debug;

use nirbhay_config::MotionConfig;
use nirbhay_core::{MotionReading, MotionSample, MotionState, SensorKind};

/// Both windows need at least this many samples before a verdict is produced.
pub const MIN_SAMPLES: usize = 10;

/// Fixed-capacity FIFO of magnitudes. Pushing into a full buffer evicts the oldest value.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Population variance of the buffered values, `None` when empty.
    pub fn variance(&self) -> Option<f64> {
        variance(self.values.iter().copied())
    }
}

/// Population variance `mean(|x - mean(x)|²)`.
///
/// Values are shifted by the first element before accumulating, so a constant
/// series yields exactly `0.0` and large offsets (gravity on the accelerometer)
/// do not cost precision.
pub fn variance(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut iter = values.into_iter();
    let first = iter.next()?;
    let shifted: Vec<f64> = std::iter::once(0.0).chain(iter.map(|v| v - first)).collect();
    let n = shifted.len() as f64;
    let mean = shifted.iter().sum::<f64>() / n;
    Some(shifted.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / n)
}

/// Panic iff both variances strictly exceed their thresholds.
pub fn classify(accel_variance: f64, gyro_variance: f64, accel_threshold: f64, gyro_threshold: f64) -> MotionState {
    if accel_variance > accel_threshold && gyro_variance > gyro_threshold {
        MotionState::Panic
    } else {
        MotionState::Normal
    }
}

/// Per-trip motion signal processor.
#[derive(Debug, Clone)]
pub struct MotionProcessor {
    accel: RingBuffer,
    gyro: RingBuffer,
    accel_threshold: f64,
    gyro_threshold: f64,
    last_state: MotionState,
}

impl MotionProcessor {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            accel: RingBuffer::new(config.window_capacity),
            gyro: RingBuffer::new(config.window_capacity),
            accel_threshold: config.accel_threshold,
            gyro_threshold: config.gyro_threshold,
            last_state: MotionState::Normal,
        }
    }

    pub fn ingest(&mut self, sample: &MotionSample) {
        let magnitude = sample.magnitude();
        if !magnitude.is_finite() {
            return;
        }
        match sample.kind {
            SensorKind::Accelerometer => self.accel.push(magnitude),
            SensorKind::Gyroscope => self.gyro.push(magnitude),
        }
    }

    /// Classify the current windows. `None` until both hold [`MIN_SAMPLES`].
    pub fn evaluate(&mut self) -> Option<MotionReading> {
        if self.accel.len() < MIN_SAMPLES || self.gyro.len() < MIN_SAMPLES {
            return None;
        }
        let accel_variance = self.accel.variance()?;
        let gyro_variance = self.gyro.variance()?;
        let state = classify(accel_variance, gyro_variance, self.accel_threshold, self.gyro_threshold);
        let panic_onset = state == MotionState::Panic && self.last_state == MotionState::Normal;
        self.last_state = state;

        if panic_onset {
            debug!(accel_variance, gyro_variance, "panic onset");
        }

        Some(MotionReading {
            accel_variance,
            gyro_variance,
            state,
            panic_onset,
            timestamp: Utc::now(),
        })
    }

    /// Forget buffered samples and the edge detector (used when sensing resumes).
    pub fn reset(&mut self) {
        self.accel.clear();
        self.gyro.clear();
        self.last_state = MotionState::Normal;
    }

    pub fn state(&self) -> MotionState {
        self.last_state
    }

    pub fn buffered(&self) -> (usize, usize) {
        (self.accel.len(), self.gyro.len())
    }
}
