//! The trigger hub: routes external events (webhooks, watched events) to
//! agents through a debouncer and a bounded channel.
//!
//! The HTTP layer produces; the kernel consumes. The channel drops on
//! saturation with a warning rather than blocking ingestion.

use crate::debounce::Debouncer;
use chrono::{DateTime, Utc};
use legator_types::agent::Agent;
use legator_types::meta::NamespacedName;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Bounded capacity of the trigger channel.
const CHANNEL_CAPACITY: usize = 100;

/// An admission attempt produced by an external trigger.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub agent: NamespacedName,
    pub source: String,
    pub payload: String,
    pub time: DateTime<Utc>,
}

/// Outcome of one webhook delivery, reported back to the HTTP caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerOutcome {
    /// Agents registered for the source.
    pub agents: usize,
    /// Triggers actually emitted (post-debounce, post-saturation).
    pub triggered: usize,
}

/// Routes sources to agents, debounces, and emits trigger events.
pub struct TriggerHub {
    debouncer: Debouncer,
    tx: mpsc::Sender<TriggerEvent>,
    agent_map: RwLock<HashMap<String, Vec<NamespacedName>>>,
}

impl TriggerHub {
    /// Returns the hub and the receiving half the scheduler consumes.
    pub fn new(debounce_window: Duration) -> (Self, mpsc::Receiver<TriggerEvent>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                debouncer: Debouncer::new(debounce_window),
                tx,
                agent_map: RwLock::new(HashMap::new()),
            },
            rx,
        )
    }

    /// Add a mapping from a source name to an agent.
    pub fn register_agent(&self, source: &str, agent: NamespacedName) {
        let mut map = self.agent_map.write().unwrap_or_else(|e| e.into_inner());
        let agents = map.entry(source.to_string()).or_default();
        if !agents.contains(&agent) {
            agents.push(agent);
        }
    }

    /// Remove all mappings for an agent.
    pub fn unregister_agent(&self, agent: &NamespacedName) {
        let mut map = self.agent_map.write().unwrap_or_else(|e| e.into_inner());
        map.retain(|_, agents| {
            agents.retain(|a| a != agent);
            !agents.is_empty()
        });
    }

    /// Rebuild the source map from the current agent list. Paused agents
    /// keep their registrations; admission re-checks pause state.
    pub fn refresh(&self, agents: &[Agent]) {
        let mut next: HashMap<String, Vec<NamespacedName>> = HashMap::new();
        for agent in agents {
            for trigger in &agent.spec.schedule.triggers {
                if trigger.source.is_empty() {
                    continue;
                }
                next.entry(trigger.source.clone())
                    .or_default()
                    .push(agent.meta.key());
            }
        }
        *self.agent_map.write().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Whether any agent is registered for a source.
    pub fn knows_source(&self, source: &str) -> bool {
        self.agent_map
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(source)
    }

    /// Deliver an external event: debounce per `(source, agent)`, then emit
    /// a trigger for each registered agent. Full-channel drops are logged.
    pub fn handle(&self, source: &str, payload: &str) -> TriggerOutcome {
        let agents: Vec<NamespacedName> = {
            let map = self.agent_map.read().unwrap_or_else(|e| e.into_inner());
            map.get(source).cloned().unwrap_or_default()
        };

        if agents.is_empty() {
            info!(source = %source, "no agents registered for webhook source");
            return TriggerOutcome {
                agents: 0,
                triggered: 0,
            };
        }

        let mut triggered = 0;
        for agent in &agents {
            let debounce_key = format!("{source}/{agent}");
            if !self.debouncer.should_fire(&debounce_key) {
                info!(source = %source, agent = %agent, "webhook debounced");
                continue;
            }
            let event = TriggerEvent {
                agent: agent.clone(),
                source: source.to_string(),
                payload: payload.to_string(),
                time: Utc::now(),
            };
            match self.tx.try_send(event) {
                Ok(()) => triggered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(agent = %agent, "trigger channel full, dropping webhook trigger");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(agent = %agent, "trigger channel closed, dropping webhook trigger");
                }
            }
        }

        TriggerOutcome {
            agents: agents.len(),
            triggered,
        }
    }

    /// Periodic debouncer GC.
    pub fn clean(&self) -> usize {
        self.debouncer.clean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> NamespacedName {
        NamespacedName::new("default", name)
    }

    #[tokio::test]
    async fn basic_trigger_flow() {
        let (hub, mut rx) = TriggerHub::new(Duration::from_millis(1));
        hub.register_agent("alertmanager", key("watchman-light"));

        let outcome = hub.handle("alertmanager", r#"{"alerts":[{"status":"firing"}]}"#);
        assert_eq!(outcome.agents, 1);
        assert_eq!(outcome.triggered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.agent, key("watchman-light"));
        assert_eq!(event.source, "alertmanager");
    }

    #[tokio::test]
    async fn unknown_source_triggers_nothing() {
        let (hub, mut rx) = TriggerHub::new(Duration::from_secs(30));
        let outcome = hub.handle("unknown", "{}");
        assert_eq!(outcome.agents, 0);
        assert_eq!(outcome.triggered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_delivery_within_window_is_debounced() {
        let (hub, mut rx) = TriggerHub::new(Duration::from_secs(5));
        hub.register_agent("src", key("agent1"));

        assert_eq!(hub.handle("src", "{}").triggered, 1);
        rx.recv().await.unwrap();

        assert_eq!(hub.handle("src", "{}").triggered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_removes_routing() {
        let (hub, mut rx) = TriggerHub::new(Duration::from_millis(1));
        hub.register_agent("src", key("agent1"));
        hub.unregister_agent(&key("agent1"));

        let outcome = hub.handle("src", "{}");
        assert_eq!(outcome.agents, 0);
        assert!(rx.try_recv().is_err());
        assert!(!hub.knows_source("src"));
    }

    #[tokio::test]
    async fn saturated_channel_drops_with_warning() {
        let (hub, _rx) = TriggerHub::new(Duration::from_millis(1));
        // Unique agents defeat the debouncer; the receiver is never drained.
        for i in 0..CHANNEL_CAPACITY + 10 {
            hub.register_agent("src", key(&format!("agent-{i}")));
        }
        let outcome = hub.handle("src", "{}");
        assert_eq!(outcome.agents, CHANNEL_CAPACITY + 10);
        assert_eq!(outcome.triggered, CHANNEL_CAPACITY);
    }
}
