//! Notification sinks for run reports and escalations.
//!
//! Three transports: Slack-compatible webhooks, the Telegram Bot API, and
//! generic JSON POST. The reporter resolves channel names from the bound
//! environment and delivers through the matching transport. Send failures
//! surface to the caller and are never retried.

pub mod slack;
pub mod telegram;
pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use legator_types::agent::{Agent, ReportAction, ReportingSpec};
use legator_types::environment::{ChannelSpec, ChannelType};
use legator_types::run::{FindingSeverity, GuardrailSummary, Run, RunFinding, RunPhase, UsageSummary};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, info};

pub type ChannelResult<T> = Result<T, ChannelError>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel {name:?} not found (available: {available})")]
    NotFound { name: String, available: String },

    #[error("channel {name:?}: {message}")]
    Send { name: String, message: String },

    #[error("unsupported channel type for {0:?}")]
    Unsupported(String),
}

/// Urgency classification of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Info,
    Warning,
    Failure,
    Escalation,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Success => "success",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Failure => "failure",
            Severity::Escalation => "escalation",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Severity::Success => "✅",
            Severity::Info => "ℹ️",
            Severity::Warning => "⚠️",
            Severity::Failure => "❌",
            Severity::Escalation => "🚨",
        }
    }
}

/// A structured message for delivery.
#[derive(Debug, Clone)]
pub struct Report {
    pub agent: String,
    pub emoji: String,
    pub run_name: String,
    pub severity: Severity,
    pub summary: String,
    pub body: String,
    pub findings: Vec<RunFinding>,
    pub usage: Option<UsageSummary>,
    pub guardrails: Option<GuardrailSummary>,
    pub timestamp: DateTime<Utc>,
}

/// A notification transport.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, report: &Report) -> ChannelResult<()>;
    fn name(&self) -> &str;
    fn channel_type(&self) -> &'static str;
}

/// Resolves channel names to transports and delivers reports.
#[derive(Default)]
pub struct Reporter {
    channels: HashMap<String, Box<dyn Channel>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a reporter from an environment's channel map. Channels that
    /// fail to construct are skipped with an error log.
    pub fn from_channels(specs: &std::collections::BTreeMap<String, ChannelSpec>) -> Self {
        let mut reporter = Self::new();
        for (name, spec) in specs {
            match channel_from_spec(name, spec) {
                Ok(ch) => reporter.register(ch),
                Err(e) => error!(channel = %name, error = %e, "failed to create channel"),
            }
        }
        reporter
    }

    pub fn register(&mut self, channel: Box<dyn Channel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }

    /// Deliver a report to one named channel.
    pub async fn send(&self, channel_name: &str, report: &Report) -> ChannelResult<()> {
        let ch = self
            .channels
            .get(channel_name)
            .ok_or_else(|| ChannelError::NotFound {
                name: channel_name.to_string(),
                available: self.channel_names().join(", "),
            })?;
        info!(
            channel = %channel_name,
            agent = %report.agent,
            severity = report.severity.as_str(),
            "sending report"
        );
        ch.send(report).await
    }

    /// Deliver a report to every channel, collecting failures.
    pub async fn send_to_all(&self, report: &Report) -> Vec<ChannelError> {
        let mut errors = Vec::new();
        for (name, ch) in &self.channels {
            if let Err(e) = ch.send(report).await {
                error!(channel = %name, error = %e, "failed to send report");
                errors.push(e);
            }
        }
        errors
    }
}

fn channel_from_spec(name: &str, spec: &ChannelSpec) -> ChannelResult<Box<dyn Channel>> {
    match spec.channel_type {
        ChannelType::Slack => Ok(Box::new(slack::SlackChannel::new(name, &spec.target))),
        ChannelType::Telegram => Ok(Box::new(telegram::TelegramChannel::new(
            name,
            &spec.target,
            String::new(),
        ))),
        ChannelType::Webhook => Ok(Box::new(webhook::WebhookChannel::new(name, &spec.target))),
    }
}

// -- Report construction ----------------------------------------------------

/// Build a report from a completed run.
pub fn report_from_run(agent: &Agent, run: &Run) -> Report {
    let emoji = if agent.spec.emoji.is_empty() {
        "🤖".to_string()
    } else {
        agent.spec.emoji.clone()
    };

    let (severity, summary) = match run.status.phase {
        RunPhase::Succeeded => (Severity::Success, "Run completed successfully".to_string()),
        RunPhase::Failed => (Severity::Failure, "Run failed".to_string()),
        RunPhase::Escalated => (
            Severity::Escalation,
            "Run escalated — action blocked by guardrails".to_string(),
        ),
        RunPhase::Blocked => (
            Severity::Escalation,
            "Run blocked — all actions denied".to_string(),
        ),
        other => (Severity::Info, format!("Run ended with phase: {other:?}")),
    };

    Report {
        agent: agent.meta.name.clone(),
        emoji,
        run_name: run.meta.name.clone(),
        severity,
        summary,
        body: run.status.report.clone(),
        findings: run.status.findings.clone(),
        usage: Some(run.status.usage.clone()),
        guardrails: Some(run.status.guardrails.clone()),
        timestamp: Utc::now(),
    }
}

/// Decide whether a completed run should be reported, and how.
pub fn should_report(reporting: Option<&ReportingSpec>, run: &Run) -> (bool, ReportAction) {
    let defaults = ReportingSpec::default();
    let reporting = reporting.unwrap_or(&defaults);

    match run.status.phase {
        RunPhase::Succeeded => {
            if !run.status.findings.is_empty() {
                (reporting.on_finding != ReportAction::Silent, reporting.on_finding)
            } else {
                (reporting.on_success != ReportAction::Silent, reporting.on_success)
            }
        }
        RunPhase::Failed => (reporting.on_failure != ReportAction::Silent, reporting.on_failure),
        RunPhase::Escalated | RunPhase::Blocked => (true, ReportAction::Escalate),
        _ => (false, ReportAction::Silent),
    }
}

/// USD cost estimate from token usage and per-million-token pricing.
///
/// Sub-cent costs keep four decimals so cheap runs don't all read `$0.00`.
/// Returns an empty string when no pricing applies.
pub fn estimate_cost(
    usage: &UsageSummary,
    input_cost_per_million: f64,
    output_cost_per_million: f64,
) -> String {
    if input_cost_per_million == 0.0 && output_cost_per_million == 0.0 {
        return String::new();
    }
    let cost = (usage.tokens_in as f64 * input_cost_per_million
        + usage.tokens_out as f64 * output_cost_per_million)
        / 1_000_000.0;
    if cost < 0.01 {
        format!("${cost:.4}")
    } else {
        format!("${cost:.2}")
    }
}

// -- Shared formatting ------------------------------------------------------

pub(crate) fn format_findings(findings: &[RunFinding]) -> String {
    let mut out = String::from("*Findings:*\n");
    for f in findings {
        let icon = match f.severity {
            FindingSeverity::Critical => "🔴",
            FindingSeverity::Warning => "🟡",
            FindingSeverity::Info => "ℹ️",
        };
        if f.resource.is_empty() {
            out.push_str(&format!("{icon} {}\n", f.message));
        } else {
            out.push_str(&format!("{icon} {} — {}\n", f.resource, f.message));
        }
    }
    out
}

pub(crate) fn format_usage(usage: &UsageSummary) -> String {
    let mut parts = vec![
        format!("tokens: {}", usage.total_tokens),
        format!("iterations: {}", usage.iterations),
    ];
    if usage.wall_clock_ms > 0 {
        parts.push(format!("time: {}ms", usage.wall_clock_ms));
    }
    if !usage.estimated_cost.is_empty() {
        parts.push(format!("cost: {}", usage.estimated_cost));
    }
    format!("📊 {}", parts.join(" | "))
}

pub(crate) fn truncate_body(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n… (truncated)", &body[..end])
}

pub mod testing {
    //! A channel that records sends, for tests across the workspace.

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockChannel {
        pub channel_name: String,
        pub reports: Mutex<Vec<Report>>,
        pub fail: bool,
    }

    impl MockChannel {
        pub fn new(name: &str) -> Self {
            Self {
                channel_name: name.to_string(),
                reports: Mutex::new(Vec::new()),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        async fn send(&self, report: &Report) -> ChannelResult<()> {
            if self.fail {
                return Err(ChannelError::Send {
                    name: self.channel_name.clone(),
                    message: "mock failure".to_string(),
                });
            }
            self.reports
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(report.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            &self.channel_name
        }

        fn channel_type(&self) -> &'static str {
            "mock"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use legator_types::agent::{AgentSpec, AgentStatus};
    use legator_types::meta::ObjectMeta;
    use legator_types::run::{RunSpec, RunStatus, TriggerReason};

    fn make_agent() -> Agent {
        Agent {
            meta: ObjectMeta::new("default", "watchman"),
            spec: AgentSpec {
                description: "watches things".into(),
                emoji: String::new(),
                schedule: Default::default(),
                model: Default::default(),
                skills: vec![],
                capabilities: None,
                guardrails: Default::default(),
                reporting: None,
                environment_ref: "env".into(),
                paused: false,
            },
            status: AgentStatus::default(),
        }
    }

    fn make_run(phase: RunPhase) -> Run {
        Run {
            meta: ObjectMeta::new("default", "watchman-20260219100500"),
            spec: RunSpec {
                agent_ref: "watchman".into(),
                environment_ref: "env".into(),
                reason: TriggerReason::Scheduled,
                trigger_detail: String::new(),
            },
            status: RunStatus {
                phase,
                ..Default::default()
            },
        }
    }

    #[test]
    fn report_severity_follows_phase() {
        let agent = make_agent();
        let r = report_from_run(&agent, &make_run(RunPhase::Succeeded));
        assert_eq!(r.severity, Severity::Success);
        assert_eq!(r.emoji, "🤖");

        let r = report_from_run(&agent, &make_run(RunPhase::Blocked));
        assert_eq!(r.severity, Severity::Escalation);
    }

    #[test]
    fn default_policy_silences_success_escalates_failure() {
        let (send, _) = should_report(None, &make_run(RunPhase::Succeeded));
        assert!(!send);

        let (send, action) = should_report(None, &make_run(RunPhase::Failed));
        assert!(send);
        assert_eq!(action, ReportAction::Escalate);

        let (send, action) = should_report(None, &make_run(RunPhase::Escalated));
        assert!(send);
        assert_eq!(action, ReportAction::Escalate);
    }

    #[test]
    fn findings_switch_success_to_finding_policy() {
        let mut run = make_run(RunPhase::Succeeded);
        run.status.findings.push(RunFinding {
            severity: FindingSeverity::Warning,
            resource: "pod/api-0".into(),
            message: "restart loop".into(),
        });
        let (send, action) = should_report(None, &run);
        assert!(send);
        assert_eq!(action, ReportAction::Log);
    }

    #[test]
    fn cost_estimation_formats_by_magnitude() {
        let usage = UsageSummary {
            tokens_in: 1_000_000,
            tokens_out: 1_000_000,
            ..Default::default()
        };
        assert_eq!(estimate_cost(&usage, 3.0, 15.0), "$18.00");

        let small = UsageSummary {
            tokens_in: 100,
            tokens_out: 100,
            ..Default::default()
        };
        assert_eq!(estimate_cost(&small, 3.0, 15.0), "$0.0018");

        // No pricing, no estimate.
        assert_eq!(estimate_cost(&usage, 0.0, 0.0), "");
    }

    #[test]
    fn usage_footer_includes_cost_when_present() {
        let usage = UsageSummary {
            total_tokens: 1540,
            iterations: 4,
            estimated_cost: "$0.05".into(),
            ..Default::default()
        };
        let footer = format_usage(&usage);
        assert!(footer.contains("cost: $0.05"));

        let without = UsageSummary {
            total_tokens: 1540,
            iterations: 4,
            ..Default::default()
        };
        assert!(!format_usage(&without).contains("cost"));
    }

    #[test]
    fn truncation_is_bounded() {
        let long = "x".repeat(5000);
        let out = truncate_body(&long, 2900);
        assert!(out.len() < 3000);
        assert!(out.ends_with("… (truncated)"));
    }

    #[tokio::test]
    async fn reporter_send_to_missing_channel_errors() {
        let reporter = Reporter::new();
        let report = report_from_run(&make_agent(), &make_run(RunPhase::Failed));
        let err = reporter.send("nope", &report).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotFound { .. }));
    }

    #[tokio::test]
    async fn mock_channel_records() {
        let mut reporter = Reporter::new();
        reporter.register(Box::new(testing::MockChannel::new("ops")));
        let report = report_from_run(&make_agent(), &make_run(RunPhase::Failed));
        reporter.send("ops", &report).await.unwrap();
    }
}
