use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A one-second countdown tick, tagged with the generation that scheduled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownTick {
    pub generation: u64,
    /// Seconds still to run after this tick.
    pub remaining: u32,
}

/// Runs at most one countdown at a time. Starting a new one cancels the old.
///
/// Each run sends one tick per period into the shared channel. A cancelled run
/// stops sending; any tick already queued carries its old generation and is
/// dropped by the state machine.
pub struct Countdown {
    tx: mpsc::Sender<CountdownTick>,
    period: Duration,
    current: Option<(u64, CancellationToken)>,
}

impl Countdown {
    pub fn new(tx: mpsc::Sender<CountdownTick>) -> Self {
        Self::with_period(tx, Duration::from_secs(1))
    }

    pub fn with_period(tx: mpsc::Sender<CountdownTick>, period: Duration) -> Self {
        Self {
            tx,
            period,
            current: None,
        }
    }

    pub fn start(&mut self, generation: u64, secs: u32) {
        self.cancel();
        let token = CancellationToken::new();
        let cancel = token.clone();
        let tx = self.tx.clone();
        let period = self.period;

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            for remaining in (0..secs).rev() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(generation, "countdown cancelled");
                        return;
                    }
                    _ = ticker.tick() => {
                        if tx.send(CountdownTick { generation, remaining }).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        self.current = Some((generation, token));
    }

    /// Cancel the running countdown, if any.
    pub fn cancel(&mut self) {
        if let Some((generation, token)) = self.current.take() {
            token.cancel();
            debug!(generation, "countdown stopped");
        }
    }

    /// Generation of the running countdown.
    pub fn running(&self) -> Option<u64> {
        self.current.as_ref().filter(|(_, t)| !t.is_cancelled()).map(|(g, _)| *g)
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.cancel();
    }
}
