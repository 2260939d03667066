//! The escalation engine: notify a human about a gated action, wait for
//! the configured window, then apply the timeout policy.

use legator_channels::{Report, Reporter, Severity};
use legator_types::agent::{Agent, EscalationTarget, TimeoutAction};
use legator_types::duration::parse_duration_or;
use legator_types::run::ActionTier;
use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// What needs escalating.
#[derive(Debug, Clone)]
pub struct EscalationRequest {
    pub run_name: String,
    /// The action the agent tried, e.g. `"kubectl.delete"`.
    pub blocked_action: String,
    pub block_reason: String,
    pub tier: ActionTier,
}

/// What happened with the escalation.
#[derive(Debug, Clone)]
pub struct EscalationResult {
    pub sent: bool,
    pub timed_out: bool,
    /// The policy to apply after the wait.
    pub policy: TimeoutAction,
    pub error: Option<String>,
}

/// Dispatches escalations through the reporter and waits out the window.
pub struct EscalationEngine;

impl EscalationEngine {
    /// Send the notification, wait for the configured timeout, and return
    /// the policy to apply. The wait is cancellable via the run's token;
    /// cancellation returns with `timed_out = false` and the cancel policy.
    pub async fn escalate(
        reporter: &Reporter,
        agent: &Agent,
        req: EscalationRequest,
        cancel: &CancellationToken,
    ) -> EscalationResult {
        let Some(escalation) = agent.spec.guardrails.escalation.clone() else {
            info!(
                agent = %agent.meta.name,
                action = %req.blocked_action,
                "no escalation config, applying cancel policy"
            );
            return EscalationResult {
                sent: false,
                timed_out: false,
                policy: TimeoutAction::Cancel,
                error: None,
            };
        };

        let timeout = parse_duration_or(&escalation.timeout, DEFAULT_TIMEOUT);
        let mut result = EscalationResult {
            sent: false,
            timed_out: false,
            policy: escalation.on_timeout,
            error: None,
        };

        let report = Report {
            agent: agent.meta.name.clone(),
            emoji: agent.spec.emoji.clone(),
            run_name: req.run_name.clone(),
            severity: Severity::Escalation,
            summary: format!("Action blocked: {}", req.blocked_action),
            body: format!(
                "**Escalation**: Agent `{}` attempted `{}` (tier: {}) but was blocked.\n\n\
                 **Reason**: {}\n\n\
                 **Autonomy level**: {}\n\n\
                 This escalation will {} after {}.",
                agent.meta.name,
                req.blocked_action,
                req.tier,
                req.block_reason,
                agent.spec.guardrails.autonomy,
                describe_timeout_action(escalation.on_timeout),
                escalation.timeout,
            ),
            findings: vec![],
            usage: None,
            guardrails: None,
            timestamp: Utc::now(),
        };

        // Route to the named channel; `parent`/`human` targets fall back to
        // a channel registered under that name.
        let channel_name = if escalation.channel_name.is_empty() {
            target_name(escalation.target).to_string()
        } else {
            escalation.channel_name.clone()
        };

        if reporter.has_channel(&channel_name) {
            match reporter.send(&channel_name, &report).await {
                Ok(()) => result.sent = true,
                Err(e) => {
                    warn!(
                        channel = %channel_name,
                        agent = %agent.meta.name,
                        error = %e,
                        "failed to send escalation"
                    );
                    result.error = Some(e.to_string());
                }
            }
        } else {
            info!(
                channel = %channel_name,
                agent = %agent.meta.name,
                action = %req.blocked_action,
                reason = %req.block_reason,
                "escalation channel not found, logging only"
            );
        }

        info!(
            agent = %agent.meta.name,
            timeout_secs = timeout.as_secs(),
            on_timeout = ?escalation.on_timeout,
            "waiting for escalation timeout"
        );
        tokio::select! {
            _ = cancel.cancelled() => {
                result.error = Some("cancelled while waiting".to_string());
                return result;
            }
            _ = tokio::time::sleep(timeout) => {
                result.timed_out = true;
            }
        }

        info!(
            agent = %agent.meta.name,
            policy = ?result.policy,
            "escalation timed out, applying policy"
        );
        result
    }
}

fn target_name(target: EscalationTarget) -> &'static str {
    match target {
        EscalationTarget::Parent => "parent",
        EscalationTarget::Channel => "channel",
        EscalationTarget::Human => "human",
    }
}

fn describe_timeout_action(action: TimeoutAction) -> &'static str {
    match action {
        TimeoutAction::Cancel => "cancel the run",
        TimeoutAction::Proceed => "proceed with the action",
        TimeoutAction::Retry => "retry the action",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use legator_channels::testing::MockChannel;
    use legator_types::agent::{AgentSpec, AgentStatus, EscalationSpec};
    use legator_types::meta::ObjectMeta;

    fn agent_with_escalation(escalation: Option<EscalationSpec>) -> Agent {
        let mut guardrails = legator_types::agent::GuardrailsSpec::default();
        guardrails.escalation = escalation;
        Agent {
            meta: ObjectMeta::new("default", "guarded"),
            spec: AgentSpec {
                description: "guarded agent".into(),
                emoji: "🛡️".into(),
                schedule: Default::default(),
                model: Default::default(),
                skills: vec![],
                capabilities: None,
                guardrails,
                reporting: None,
                environment_ref: "env".into(),
                paused: false,
            },
            status: AgentStatus::default(),
        }
    }

    fn request() -> EscalationRequest {
        EscalationRequest {
            run_name: "guarded-1".into(),
            blocked_action: "ssh.reboot".into(),
            block_reason: "destructive beyond ceiling".into(),
            tier: ActionTier::DestructiveMutation,
        }
    }

    #[tokio::test]
    async fn no_config_applies_cancel_without_sending() {
        let reporter = Reporter::new();
        let agent = agent_with_escalation(None);
        let result =
            EscalationEngine::escalate(&reporter, &agent, request(), &CancellationToken::new())
                .await;
        assert!(!result.sent);
        assert_eq!(result.policy, TimeoutAction::Cancel);
    }

    #[tokio::test]
    async fn sends_then_times_out_with_policy() {
        let mut reporter = Reporter::new();
        reporter.register(Box::new(MockChannel::new("ops")));
        let agent = agent_with_escalation(Some(EscalationSpec {
            channel_name: "ops".into(),
            timeout: "50ms".into(),
            on_timeout: TimeoutAction::Proceed,
            ..Default::default()
        }));

        let result =
            EscalationEngine::escalate(&reporter, &agent, request(), &CancellationToken::new())
                .await;
        assert!(result.sent);
        assert!(result.timed_out);
        assert_eq!(result.policy, TimeoutAction::Proceed);
    }

    #[tokio::test]
    async fn missing_channel_logs_only_and_still_waits() {
        let reporter = Reporter::new();
        let agent = agent_with_escalation(Some(EscalationSpec {
            channel_name: "nonexistent".into(),
            timeout: "20ms".into(),
            on_timeout: TimeoutAction::Cancel,
            ..Default::default()
        }));

        let result =
            EscalationEngine::escalate(&reporter, &agent, request(), &CancellationToken::new())
                .await;
        assert!(!result.sent);
        assert!(result.timed_out);
        assert_eq!(result.policy, TimeoutAction::Cancel);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let reporter = Reporter::new();
        let agent = agent_with_escalation(Some(EscalationSpec {
            channel_name: "nonexistent".into(),
            timeout: "60s".into(),
            on_timeout: TimeoutAction::Cancel,
            ..Default::default()
        }));
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel_clone.cancel();
        });

        let result = EscalationEngine::escalate(&reporter, &agent, request(), &cancel).await;
        assert!(!result.timed_out);
        assert!(result.error.is_some());
    }
}
