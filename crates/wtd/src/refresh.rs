//! Background refresh loop with degraded-interval backoff.
//!
//! The cycle is `Idle -> Refreshing -> (Idle | Backoff)`: success resets the
//! interval to base, failure doubles it up to a ceiling, and the loop keeps
//! trying until stopped. There is no terminal error state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{PrCache, RefreshOutcome};

/// Backoff factor applied per consecutive failure.
pub const BACKOFF_FACTOR: u32 = 2;
/// Ceiling as a multiple of the base interval.
pub const BACKOFF_CEILING_MULTIPLIER: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    pub base_interval: Duration,
    pub max_interval: Duration,
}

impl RefreshConfig {
    pub fn from_base(base_interval: Duration) -> Self {
        Self {
            base_interval,
            max_interval: base_interval * BACKOFF_CEILING_MULTIPLIER,
        }
    }
}

/// Scheduler-internal cycle state; mutated only by the loop itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshCycleState {
    pub consecutive_failures: u32,
    pub interval: Duration,
}

impl RefreshCycleState {
    pub fn new(config: &RefreshConfig) -> Self {
        Self {
            consecutive_failures: 0,
            interval: config.base_interval,
        }
    }

    pub fn record_success(&mut self, config: &RefreshConfig) {
        self.consecutive_failures = 0;
        self.interval = config.base_interval;
    }

    pub fn record_failure(&mut self, config: &RefreshConfig) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.interval = interval_after_failures(config, self.consecutive_failures);
    }
}

/// `min(base * FACTOR^failures, ceiling)`.
pub fn interval_after_failures(config: &RefreshConfig, failures: u32) -> Duration {
    let mut interval = config.base_interval;
    for _ in 0..failures {
        interval = interval.saturating_mul(BACKOFF_FACTOR);
        if interval >= config.max_interval {
            return config.max_interval;
        }
    }
    interval.min(config.max_interval)
}

/// Handle to the running background loop. Exactly one per daemon process.
pub struct RefreshScheduler {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RefreshScheduler {
    /// Spawn the loop. The daemon performs the first deterministic cache
    /// fill itself before starting the scheduler, so the first tick here
    /// waits a full base interval.
    pub fn start(cache: Arc<PrCache>, config: RefreshConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(cache, config, stop_rx));
        Self { stop_tx, handle }
    }

    /// Signal the loop to exit after its current iteration. Returns
    /// immediately; a refresh in flight is not cancelled.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait for the loop task to finish.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.handle.await;
    }
}

async fn run_loop(cache: Arc<PrCache>, config: RefreshConfig, mut stop_rx: watch::Receiver<bool>) {
    let mut cycle = RefreshCycleState::new(&config);
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(cycle.interval) => {
                match cache.refresh().await {
                    RefreshOutcome::Unavailable { cause } => {
                        cycle.record_failure(&config);
                        warn!(
                            failures = cycle.consecutive_failures,
                            next_interval_secs = cycle.interval.as_secs(),
                            %cause,
                            "pr refresh failed, backing off"
                        );
                    }
                    RefreshOutcome::Refreshed { branches } => {
                        cycle.record_success(&config);
                        debug!(branches, "pr refresh completed");
                    }
                    RefreshOutcome::Coalesced => {
                        // A client-triggered refresh beat us to it; the data
                        // is fresh, count it as a success.
                        cycle.record_success(&config);
                    }
                }
            }
        }
    }
    debug!("refresh scheduler stopped");
}
