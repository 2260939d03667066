//! The AgentEvent resource — a finding or signal published by one agent for
//! consumption by others.

use crate::meta::ObjectMeta;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventSeverity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPhase {
    #[default]
    New,
    Delivered,
    Consumed,
    Expired,
}

/// A finding, alert, or signal published by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEventSpec {
    pub source_agent: String,
    #[serde(default)]
    pub source_run: String,
    /// Event kind, e.g. `"finding"`, `"alert"`, `"recommendation"`.
    pub event_type: String,
    pub severity: EventSeverity,
    pub summary: String,
    #[serde(default)]
    pub detail: String,
    /// Specific agent to trigger, for directed events.
    #[serde(default)]
    pub target_agent: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// How long the event remains actionable, as a duration string.
    #[serde(default)]
    pub ttl: String,
}

/// Who consumed an event, and what it triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConsumer {
    pub agent: String,
    pub consumed_at: DateTime<Utc>,
    #[serde(default)]
    pub run_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentEventStatus {
    pub phase: EventPhase,
    pub consumed_by: Vec<EventConsumer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub meta: ObjectMeta,
    pub spec: AgentEventSpec,
    #[serde(default)]
    pub status: AgentEventStatus,
}
