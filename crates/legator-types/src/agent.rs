//! The Agent resource — declarative desired state for one autonomous
//! infrastructure agent: identity, schedule, model, skills, guardrails,
//! reporting, and environment binding.

use crate::meta::ObjectMeta;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Graduated autonomy for an agent. Ordered weakest to strongest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutonomyLevel {
    /// Read-only; the agent may only observe.
    #[default]
    Observe,
    /// Read-only, but the agent is expected to produce recommendations.
    Recommend,
    /// Reversible operational changes are permitted.
    AutomateSafe,
    /// Destructive (but not data-touching) changes are permitted.
    AutomateDestructive,
}

impl AutonomyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutonomyLevel::Observe => "observe",
            AutonomyLevel::Recommend => "recommend",
            AutonomyLevel::AutomateSafe => "automate-safe",
            AutonomyLevel::AutomateDestructive => "automate-destructive",
        }
    }
}

impl std::fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model capability class rather than a concrete model name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelTier {
    Fast,
    #[default]
    Standard,
    Reasoning,
}

/// What to do when a run outcome occurs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportAction {
    #[default]
    Silent,
    Log,
    Notify,
    Escalate,
}

/// Where escalations are sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EscalationTarget {
    /// The agent's operator (the parent notification channel).
    Parent,
    /// A named channel from the environment.
    #[default]
    Channel,
    /// A human approver.
    Human,
}

/// What happens when an escalation wait times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeoutAction {
    /// Latch the run Blocked.
    #[default]
    Cancel,
    /// Allow the originally proposed action once.
    Proceed,
    /// Give the model one more turn; it may or may not repropose.
    Retry,
}

/// How actions exceeding the autonomy ceiling are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalMode {
    /// Exceeding the ceiling blocks immediately.
    #[default]
    None,
    /// Any action exceeding the ceiling opens an approval.
    MutationGate,
    /// The first turn must emit a plan; later mutations open approvals.
    PlanFirst,
    /// Every non-read action opens an approval.
    EveryAction,
}

/// What can trigger an agent run outside its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerType {
    Webhook,
    KubernetesEvent,
}

/// An event-based trigger binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSpec {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    /// Event origin (e.g. `"alertmanager"`).
    #[serde(default)]
    pub source: String,
}

/// When an agent runs. Exactly one of `cron`, `interval`, or `triggers`
/// should be set; cron takes precedence when both cron and interval are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSpec {
    /// Standard 5-field cron expression (e.g. `"*/5 * * * *"`).
    pub cron: String,
    /// Duration string alternative to cron (e.g. `"300s"`, `"5m"`).
    pub interval: String,
    /// IANA timezone for cron evaluation. Empty means UTC.
    pub timezone: String,
    /// Event-driven triggers; an agent with only these has no scheduled time.
    pub triggers: Vec<TriggerSpec>,
}

/// LLM configuration for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    pub tier: ModelTier,
    /// Hard max tokens per run.
    pub token_budget: u64,
    /// Max wall-clock duration per run as a duration string.
    pub timeout: String,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            tier: ModelTier::Standard,
            token_budget: 50_000,
            timeout: "120s".to_string(),
        }
    }
}

/// A skill to load into the agent's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRef {
    pub name: String,
    /// Where the skill lives: `bundled`, `configmap`, or an OCI reference.
    pub source: String,
}

/// Required and optional tool capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesSpec {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

/// Escalation behaviour when an action exceeds the autonomy ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationSpec {
    pub target: EscalationTarget,
    /// Named channel in the environment (when target is `channel`).
    pub channel_name: String,
    /// How long to wait for a response, as a duration string.
    pub timeout: String,
    pub on_timeout: TimeoutAction,
}

impl Default for EscalationSpec {
    fn default() -> Self {
        Self {
            target: EscalationTarget::Channel,
            channel_name: String::new(),
            timeout: "300s".to_string(),
            on_timeout: TimeoutAction::Cancel,
        }
    }
}

/// Safety boundaries for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailsSpec {
    pub autonomy: AutonomyLevel,
    /// Glob list of permitted tool calls (overrides the ceiling, never for
    /// data mutations).
    pub allowed_actions: Vec<String>,
    /// Glob list of always-blocked tool calls (overrides allowed_actions).
    pub denied_actions: Vec<String>,
    pub escalation: Option<EscalationSpec>,
    /// Hard limit on tool-call loop iterations per run.
    pub max_iterations: u32,
    /// Max retries on transient tool failure.
    pub max_retries: u32,
    pub approval_mode: ApprovalMode,
    /// How long to wait for an approval decision before expiring.
    pub approval_timeout: String,
}

impl Default for GuardrailsSpec {
    fn default() -> Self {
        Self {
            autonomy: AutonomyLevel::Observe,
            allowed_actions: Vec::new(),
            denied_actions: Vec::new(),
            escalation: None,
            max_iterations: 10,
            max_retries: 2,
            approval_mode: ApprovalMode::None,
            approval_timeout: "30m".to_string(),
        }
    }
}

/// Outcome-to-action reporting policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingSpec {
    pub on_success: ReportAction,
    pub on_failure: ReportAction,
    pub on_finding: ReportAction,
}

impl Default for ReportingSpec {
    fn default() -> Self {
        Self {
            on_success: ReportAction::Silent,
            on_failure: ReportAction::Escalate,
            on_finding: ReportAction::Log,
        }
    }
}

/// Desired state of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub description: String,
    #[serde(default)]
    pub emoji: String,
    #[serde(default)]
    pub schedule: ScheduleSpec,
    #[serde(default)]
    pub model: ModelSpec,
    #[serde(default)]
    pub skills: Vec<SkillRef>,
    #[serde(default)]
    pub capabilities: Option<CapabilitiesSpec>,
    #[serde(default)]
    pub guardrails: GuardrailsSpec,
    #[serde(default)]
    pub reporting: Option<ReportingSpec>,
    pub environment_ref: String,
    /// Stops scheduling without deleting the agent.
    #[serde(default)]
    pub paused: bool,
}

/// Lifecycle phase of an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentPhase {
    #[default]
    Pending,
    Ready,
    Running,
    Error,
    Paused,
}

/// Observed state of an agent. Written only by the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentStatus {
    pub phase: AgentPhase,
    pub last_run_time: Option<DateTime<Utc>>,
    pub next_run_time: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub consecutive_failures: u32,
    pub last_run_name: String,
    /// Human-readable validation problem, if any (bad cron, bad timezone).
    pub validation_error: String,
}

/// An autonomous infrastructure agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub meta: ObjectMeta,
    pub spec: AgentSpec,
    #[serde(default)]
    pub status: AgentStatus,
}

impl Agent {
    /// Whether the agent has any schedule at all (cron or interval).
    /// Trigger-only agents return false.
    pub fn has_schedule(&self) -> bool {
        !self.spec.schedule.cron.is_empty() || !self.spec.schedule.interval.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autonomy_ordering_is_weakest_first() {
        assert!(AutonomyLevel::Observe < AutonomyLevel::Recommend);
        assert!(AutonomyLevel::Recommend < AutonomyLevel::AutomateSafe);
        assert!(AutonomyLevel::AutomateSafe < AutonomyLevel::AutomateDestructive);
    }

    #[test]
    fn autonomy_serializes_kebab_case() {
        let s = serde_json::to_string(&AutonomyLevel::AutomateDestructive).unwrap();
        assert_eq!(s, "\"automate-destructive\"");
        let back: AutonomyLevel = serde_json::from_str("\"automate-safe\"").unwrap();
        assert_eq!(back, AutonomyLevel::AutomateSafe);
    }

    #[test]
    fn guardrail_defaults() {
        let g: GuardrailsSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(g.autonomy, AutonomyLevel::Observe);
        assert_eq!(g.max_iterations, 10);
        assert_eq!(g.max_retries, 2);
        assert_eq!(g.approval_mode, ApprovalMode::None);
        assert_eq!(g.approval_timeout, "30m");
    }

    #[test]
    fn trigger_only_agent_has_no_schedule() {
        let agent = Agent {
            meta: ObjectMeta::new("default", "hooked"),
            spec: AgentSpec {
                description: "trigger only".into(),
                emoji: String::new(),
                schedule: ScheduleSpec {
                    triggers: vec![TriggerSpec {
                        trigger_type: TriggerType::Webhook,
                        source: "alertmanager".into(),
                    }],
                    ..Default::default()
                },
                model: ModelSpec::default(),
                skills: vec![],
                capabilities: None,
                guardrails: GuardrailsSpec::default(),
                reporting: None,
                environment_ref: "env".into(),
                paused: false,
            },
            status: AgentStatus::default(),
        };
        assert!(!agent.has_schedule());
    }
}
