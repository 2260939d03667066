//! Trigger debouncing: within one window, only the first event per key
//! fires; the rest are dropped.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

/// Prevents rapid-fire triggering from bursts of events, keyed by
/// `(source, agent)`.
pub struct Debouncer {
    window: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl Debouncer {
    /// A non-positive window falls back to the 30s default.
    pub fn new(window: Duration) -> Self {
        let window = if window.is_zero() { DEFAULT_WINDOW } else { window };
        Self {
            window,
            last: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether the event should proceed. The first call per key always
    /// fires; later calls within the window are dropped.
    pub fn should_fire(&self, key: &str) -> bool {
        let mut map = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if let Some(last) = map.get(key) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }
        map.insert(key.to_string(), now);
        true
    }

    /// Clear all debounce state.
    pub fn reset(&self) {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Drop entries older than twice the window so the map stays bounded.
    /// Returns how many were removed.
    pub fn clean(&self) -> usize {
        let mut map = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let threshold = self.window * 2;
        let now = Instant::now();
        let before = map.len();
        map.retain(|_, last| now.duration_since(*last) < threshold);
        before - map.len()
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_always_fires() {
        let d = Debouncer::new(Duration::from_secs(30));
        assert!(d.should_fire("key1"));
    }

    #[test]
    fn second_call_within_window_is_dropped() {
        let d = Debouncer::new(Duration::from_secs(30));
        assert!(d.should_fire("key1"));
        assert!(!d.should_fire("key1"));
    }

    #[test]
    fn keys_are_independent() {
        let d = Debouncer::new(Duration::from_secs(30));
        d.should_fire("key1");
        assert!(d.should_fire("key2"));
    }

    #[test]
    fn zero_window_defaults_to_30s() {
        let d = Debouncer::new(Duration::ZERO);
        assert_eq!(d.window(), Duration::from_secs(30));
    }

    #[test]
    fn fires_again_after_window() {
        let d = Debouncer::new(Duration::from_millis(10));
        assert!(d.should_fire("key1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(d.should_fire("key1"));
    }

    #[test]
    fn reset_clears_state() {
        let d = Debouncer::new(Duration::from_secs(30));
        d.should_fire("key1");
        d.reset();
        assert!(d.should_fire("key1"));
    }

    #[test]
    fn clean_drops_stale_entries() {
        let d = Debouncer::new(Duration::from_millis(5));
        d.should_fire("key1");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(d.clean(), 1);
    }
}
