//! The Run resource — the record of one agent execution, from admission to
//! terminal phase. Runs are immutable once terminal and are deleted only by
//! the retention sweeper.

use crate::meta::ObjectMeta;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk tier of a proposed action. Ordered least to most dangerous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionTier {
    /// No state change: list/describe/get, SELECT, HEAD/GET, DNS query.
    Read,
    /// Reversible operational change: start/stop/restart, scale, route change.
    ServiceMutation,
    /// Destroys a resource but not stored user data.
    DestructiveMutation,
    /// Touches persistent user data. Always gated.
    DataMutation,
}

impl ActionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionTier::Read => "read",
            ActionTier::ServiceMutation => "service-mutation",
            ActionTier::DestructiveMutation => "destructive-mutation",
            ActionTier::DataMutation => "data-mutation",
        }
    }
}

impl std::fmt::Display for ActionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run was admitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerReason {
    #[default]
    Scheduled,
    Webhook,
    Event,
    Manual,
}

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Escalated,
    Blocked,
}

impl RunPhase {
    /// A run is terminal iff it can never change phase again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Succeeded | RunPhase::Failed | RunPhase::Escalated | RunPhase::Blocked
        )
    }
}

/// The guardrail engine's verdict on one proposed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepDecision {
    /// Dispatched without human involvement.
    Allowed,
    /// Dispatched, but matched an audit protection rule.
    Audited,
    /// Dispatched after an explicit human approval.
    Approved,
    /// Refused; the run latched Blocked.
    Blocked,
    /// Escalated to a human; outcome recorded in the following entries.
    Escalated,
    /// A human denied the approval.
    Denied,
    /// The approval wait expired.
    Expired,
}

/// One append-only entry in a run's step log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: u32,
    pub tool: String,
    /// One-line summary of the proposed action (sanitized, no credentials).
    pub action: String,
    pub tier: ActionTier,
    pub decision: StepDecision,
    /// Protection rule that matched, if any.
    #[serde(default)]
    pub matched_rule: String,
    /// Size-bounded excerpt of the observation fed back to the model.
    #[serde(default)]
    pub observation: String,
    pub timestamp: DateTime<Utc>,
}

/// Severity of a structured finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingSeverity {
    Critical,
    Warning,
    Info,
}

/// A structured discovery reported by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFinding {
    pub severity: FindingSeverity,
    #[serde(default)]
    pub resource: String,
    pub message: String,
}

/// Resource consumption for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSummary {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub total_tokens: u64,
    pub iterations: u32,
    pub wall_clock_ms: u64,
    /// USD estimate from the model tier's pricing, e.g. `"$0.0042"`.
    /// Empty when no pricing applies.
    pub estimated_cost: String,
}

/// Safety activity for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailSummary {
    pub checks_performed: u32,
    pub actions_blocked: u32,
    pub escalations_triggered: u32,
    /// The autonomy level frozen at admission.
    pub autonomy_ceiling: String,
}

/// Immutable admission facts for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub agent_ref: String,
    pub environment_ref: String,
    pub reason: TriggerReason,
    /// Trigger payload or source detail, if any.
    #[serde(default)]
    pub trigger_detail: String,
}

/// Observed state of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStatus {
    pub phase: RunPhase,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    /// Final report text from the model.
    pub report: String,
    /// Terminal failure reason (e.g. "budget", "timeout"), if any.
    pub reason: String,
    pub findings: Vec<RunFinding>,
    pub usage: UsageSummary,
    pub guardrails: GuardrailSummary,
    /// Cleanup problems (credential revocation, notification). Recorded,
    /// never alter the terminal phase.
    pub cleanup_errors: Vec<String>,
}

/// One execution of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub meta: ObjectMeta,
    pub spec: RunSpec,
    #[serde(default)]
    pub status: RunStatus,
}

/// Deterministic run name for an admission tick, so a restarted scheduler
/// re-admitting the same `(agent, trigger timestamp)` produces the same
/// object instead of a duplicate.
pub fn run_name(agent: &str, trigger_time: DateTime<Utc>) -> String {
    format!("{}-{}", agent, trigger_time.format("%Y%m%d%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn terminal_phases() {
        assert!(!RunPhase::Pending.is_terminal());
        assert!(!RunPhase::Running.is_terminal());
        assert!(RunPhase::Succeeded.is_terminal());
        assert!(RunPhase::Failed.is_terminal());
        assert!(RunPhase::Escalated.is_terminal());
        assert!(RunPhase::Blocked.is_terminal());
    }

    #[test]
    fn tier_ordering() {
        assert!(ActionTier::Read < ActionTier::ServiceMutation);
        assert!(ActionTier::ServiceMutation < ActionTier::DestructiveMutation);
        assert!(ActionTier::DestructiveMutation < ActionTier::DataMutation);
    }

    #[test]
    fn run_name_is_deterministic() {
        let t = Utc.with_ymd_and_hms(2026, 2, 19, 10, 5, 0).unwrap();
        let a = run_name("watchman", t);
        let b = run_name("watchman", t);
        assert_eq!(a, b);
        assert_eq!(a, "watchman-20260219100500");
    }

    #[test]
    fn tier_serializes_kebab_case() {
        let s = serde_json::to_string(&ActionTier::DataMutation).unwrap();
        assert_eq!(s, "\"data-mutation\"");
    }
}
