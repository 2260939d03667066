//! Graceful drain: let in-flight runs finish on shutdown, then cancel
//! whatever remains at the hard deadline.

use crate::concurrency::RunTracker;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Coordinates shutdown of in-progress runs. Cooperative completion is
/// never trusted alone: a hard deadline always backs the wait.
pub struct ShutdownManager {
    tracker: Arc<RunTracker>,
    drain_timeout: Duration,
    cancels: Mutex<HashMap<String, CancellationToken>>,
}

impl ShutdownManager {
    pub fn new(tracker: Arc<RunTracker>, drain_timeout: Duration) -> Self {
        Self {
            tracker,
            drain_timeout,
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Track a run's cancellation token so a hard shutdown can reach it.
    pub fn register_run(&self, key: &str, token: CancellationToken) {
        self.cancels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), token);
    }

    /// Remove a completed run from tracking.
    pub fn deregister_run(&self, key: &str) {
        self.cancels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    pub fn active_runs(&self) -> usize {
        self.cancels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Block until all in-flight runs finish or the drain deadline passes,
    /// cancelling the remainder. Returns how many were forcibly cancelled.
    pub async fn wait_for_drain(&self) -> usize {
        let inflight = self.tracker.in_flight_count();
        if inflight == 0 {
            info!("no in-flight runs, clean shutdown");
            return 0;
        }

        info!(
            inflight,
            timeout_secs = self.drain_timeout.as_secs(),
            "waiting for in-flight runs to complete"
        );

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    let remaining = self.tracker.in_flight_count();
                    if remaining > 0 {
                        info!(remaining, "drain timeout reached, cancelling remaining runs");
                        self.cancel_all();
                        return remaining;
                    }
                    return 0;
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    if self.tracker.in_flight_count() == 0 {
                        info!("all in-flight runs completed, clean shutdown");
                        return 0;
                    }
                }
            }
        }
    }

    fn cancel_all(&self) {
        let mut map = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
        for (key, token) in map.drain() {
            info!(run = %key, "cancelling in-flight run");
            token.cancel();
        }
    }
}
