//! The per-agent concurrency gate: at most one in-flight run per agent.
//!
//! The in-memory set is authoritative for admission — the store is not
//! consulted, because a read-after-write race there would allow double
//! dispatch. The stale sweep defends against runners that crashed without
//! completing.

use chrono::{DateTime, Utc};
use legator_types::meta::NamespacedName;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// What to do when a run is requested while another is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    /// Drop the new tick. The only implemented policy.
    #[default]
    Skip,
    /// Reserved: queue the tick behind the current run. Admission keeps
    /// Skip semantics until queueing is designed.
    Queue,
}

/// Metadata about an in-flight run.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub run_name: String,
    pub started_at: DateTime<Utc>,
}

/// Tracks in-flight runs to enforce one-at-a-time admission. Thread-safe.
#[derive(Default)]
pub struct RunTracker {
    inflight: Mutex<HashMap<NamespacedName, RunInfo>>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to mark an agent as running. Returns true iff the agent had
    /// no in-flight run (admission succeeds).
    pub fn try_start(&self, agent: &NamespacedName, run_name: &str) -> bool {
        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(agent) {
            return false;
        }
        map.insert(
            agent.clone(),
            RunInfo {
                run_name: run_name.to_string(),
                started_at: Utc::now(),
            },
        );
        true
    }

    /// Mark an agent's run as finished.
    pub fn complete(&self, agent: &NamespacedName) {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(agent);
    }

    pub fn is_running(&self, agent: &NamespacedName) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(agent)
    }

    pub fn run_info(&self, agent: &NamespacedName) -> Option<RunInfo> {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent)
            .cloned()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Remove entries older than `max_age`, covering runs that crashed
    /// without calling `complete`. Returns how many were removed.
    pub fn clean_stale(&self, max_age: Duration) -> usize {
        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let before = map.len();
        map.retain(|_, info| info.started_at >= cutoff);
        before - map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> NamespacedName {
        NamespacedName::new("ns", name)
    }

    #[test]
    fn first_start_succeeds_second_is_rejected() {
        let tracker = RunTracker::new();
        assert!(tracker.try_start(&key("agent1"), "run1"));
        assert!(!tracker.try_start(&key("agent1"), "run2"));
        assert!(tracker.try_start(&key("agent2"), "run3"));
        assert_eq!(tracker.in_flight_count(), 2);
    }

    #[test]
    fn complete_releases_the_gate() {
        let tracker = RunTracker::new();
        tracker.try_start(&key("agent1"), "run1");
        assert!(tracker.is_running(&key("agent1")));

        tracker.complete(&key("agent1"));
        assert!(!tracker.is_running(&key("agent1")));
        assert!(tracker.try_start(&key("agent1"), "run2"));
    }

    #[test]
    fn run_info_reflects_admission() {
        let tracker = RunTracker::new();
        assert!(tracker.run_info(&key("agent1")).is_none());

        tracker.try_start(&key("agent1"), "my-run");
        let info = tracker.run_info(&key("agent1")).unwrap();
        assert_eq!(info.run_name, "my-run");
    }

    #[test]
    fn stale_entries_are_swept() {
        let tracker = RunTracker::new();
        tracker.try_start(&key("agent1"), "run1");
        {
            let mut map = tracker.inflight.lock().unwrap();
            map.get_mut(&key("agent1")).unwrap().started_at = Utc::now() - chrono::Duration::hours(1);
        }

        let cleaned = tracker.clean_stale(Duration::from_secs(1800));
        assert_eq!(cleaned, 1);
        assert!(!tracker.is_running(&key("agent1")));
    }

    #[test]
    fn fresh_entries_survive_the_sweep() {
        let tracker = RunTracker::new();
        tracker.try_start(&key("agent1"), "run1");
        assert_eq!(tracker.clean_stale(Duration::from_secs(1800)), 0);
        assert!(tracker.is_running(&key("agent1")));
    }
}
