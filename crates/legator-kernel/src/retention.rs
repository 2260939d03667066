//! The retention sweeper: periodic eviction of old terminal runs with a
//! minimum-per-agent preservation floor. Single-leader: the kernel starts
//! exactly one sweeper task.

use legator_store::Store;
use legator_types::run::Run;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// How long terminal runs are retained.
    pub ttl: Duration,
    /// How often the sweeper scans.
    pub scan_interval: Duration,
    /// Max deletions per sweep.
    pub max_delete_batch: usize,
    /// Keep at least this many runs per agent regardless of age.
    pub preserve_min_per_agent: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(7 * 24 * 3600),
            scan_interval: Duration::from_secs(3600),
            max_delete_batch: 100,
            preserve_min_per_agent: 5,
        }
    }
}

/// What happened in one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepResult {
    pub scanned: usize,
    pub eligible: usize,
    pub deleted: usize,
    pub errors: usize,
}

/// Deletes old terminal runs.
pub struct RetentionSweeper {
    store: Arc<Store>,
    config: RetentionConfig,
    /// Injectable clock for tests.
    now: fn() -> DateTime<Utc>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<Store>, config: RetentionConfig) -> Self {
        Self {
            store,
            config,
            now: Utc::now,
        }
    }

    /// Replace the clock (tests).
    pub fn with_clock(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Run the sweep loop until shutdown. Scans immediately, then on the
    /// configured interval.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            ttl_secs = self.config.ttl.as_secs(),
            scan_interval_secs = self.config.scan_interval.as_secs(),
            max_delete_batch = self.config.max_delete_batch,
            preserve_min_per_agent = self.config.preserve_min_per_agent,
            "retention sweeper starting"
        );
        self.sweep_and_log();

        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.tick().await; // Skip first immediate tick
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("retention sweeper stopping");
                    return;
                }
                _ = interval.tick() => self.sweep_and_log(),
            }
        }
    }

    fn sweep_and_log(&self) {
        let result = self.sweep();
        if result.deleted > 0 || result.errors > 0 {
            info!(
                scanned = result.scanned,
                eligible = result.eligible,
                deleted = result.deleted,
                errors = result.errors,
                "retention sweep complete"
            );
        } else {
            debug!(scanned = result.scanned, "retention sweep complete, nothing to clean");
        }
    }

    /// One sweep: group runs by agent newest-first, preserve the first N
    /// unconditionally, delete terminal runs past the TTL up to the batch
    /// limit. Non-terminal runs are never deleted.
    pub fn sweep(&self) -> SweepResult {
        let mut result = SweepResult::default();

        let runs = self.store.runs.list();
        result.scanned = runs.len();
        let cutoff = (self.now)() - chrono::Duration::from_std(self.config.ttl).unwrap_or_else(|_| chrono::Duration::zero());

        let mut by_agent: HashMap<String, Vec<Run>> = HashMap::new();
        for run in runs {
            let agent_key = format!("{}/{}", run.meta.namespace, run.spec.agent_ref);
            by_agent.entry(agent_key).or_default().push(run);
        }

        let mut to_delete = Vec::new();
        for runs in by_agent.values_mut() {
            // Newest first, by creation time.
            runs.sort_by(|a, b| b.meta.creation_timestamp.cmp(&a.meta.creation_timestamp));
            for (i, run) in runs.iter().enumerate() {
                if !run.status.phase.is_terminal() {
                    continue;
                }
                if i < self.config.preserve_min_per_agent {
                    continue;
                }
                let reference = run
                    .status
                    .completion_time
                    .or(run.meta.creation_timestamp)
                    .unwrap_or_else(|| (self.now)());
                if reference < cutoff {
                    to_delete.push(run.meta.key());
                }
            }
        }

        result.eligible = to_delete.len();
        to_delete.truncate(self.config.max_delete_batch);

        for key in to_delete {
            match self.store.runs.delete(&key) {
                Ok(_) => result.deleted += 1,
                Err(e) => {
                    warn!(run = %key, error = %e, "failed to delete expired run");
                    result.errors += 1;
                }
            }
        }

        result
    }
}
