//! The guardrail engine: gates every proposed tool call.
//!
//! Evaluation order: classifier refusal → protection rules (built-ins
//! first) → deny globs → the data-mutation rule → allow globs → autonomy
//! ceiling → approval mode. The deny list overrides the allow list, which
//! overrides the ceiling; data-mutation ignores allow-list entries and is
//! admitted only through a protection rule that forces an approval.

use crate::pattern::any_match;
use crate::protection::{builtin_rules, ProtectionAction, ProtectionRule};
use legator_runtime::tools::Classification;
use legator_types::agent::{ApprovalMode, AutonomyLevel, GuardrailsSpec};
use legator_types::run::ActionTier;

/// The engine's verdict on one proposed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Dispatch. `audited` marks a matched audit rule.
    Allow { audited: bool, rule: String },
    /// Refuse and latch the run Blocked.
    Block { reason: String, rule: String },
    /// Notify a human and apply the timeout policy.
    Escalate { reason: String },
    /// Open an approval request and wait for the decision.
    RequireApproval { reason: String, rule: String },
}

/// How the frozen ceiling treats a tier, before approval-mode adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CeilingVerdict {
    Within,
    Exceeds,
    Escalates,
}

/// Stateless gate over a rule set. One engine serves every run; the
/// per-run inputs (guardrails spec, frozen ceiling) arrive per call.
pub struct GuardrailEngine {
    /// Built-in rules first, then user rules. User rules cannot weaken the
    /// built-ins because evaluation stops at the first match.
    rules: Vec<ProtectionRule>,
}

impl GuardrailEngine {
    pub fn new() -> Self {
        Self {
            rules: builtin_rules(),
        }
    }

    /// Engine with user rules appended after the built-ins.
    pub fn with_user_rules(user_rules: Vec<ProtectionRule>) -> Self {
        let mut rules = builtin_rules();
        rules.extend(user_rules);
        Self { rules }
    }

    /// Gate one proposed action.
    ///
    /// `ceiling` is the autonomy level frozen at run admission; later agent
    /// edits must not reach in-flight runs.
    pub fn evaluate(
        &self,
        guardrails: &GuardrailsSpec,
        ceiling: AutonomyLevel,
        domain: &str,
        class: &Classification,
    ) -> GateOutcome {
        // Classifier refusals (injection indicators, unknown tools) never
        // reach dispatch.
        if class.blocked {
            return GateOutcome::Block {
                reason: class.block_reason.clone(),
                rule: String::new(),
            };
        }

        // Protection rules, built-ins first; first match decides.
        let mut audited_rule = String::new();
        if let Some(rule) = self
            .rules
            .iter()
            .find(|r| r.matches(domain, &class.action))
        {
            match rule.action {
                ProtectionAction::Block => {
                    return GateOutcome::Block {
                        reason: rule.description.clone(),
                        rule: rule.pattern.clone(),
                    }
                }
                ProtectionAction::Approve => {
                    return GateOutcome::RequireApproval {
                        reason: rule.description.clone(),
                        rule: rule.pattern.clone(),
                    }
                }
                ProtectionAction::Audit => audited_rule = rule.pattern.clone(),
            }
        }

        // Deny overrides everything below.
        if any_match(&guardrails.denied_actions, &class.action) {
            return GateOutcome::Block {
                reason: format!("action {} is denied by policy", class.action),
                rule: "denied-actions".to_string(),
            };
        }

        // Data mutation is admitted only via a protection-rule approval,
        // handled above. Reaching here means no such rule matched.
        if class.tier == ActionTier::DataMutation {
            return GateOutcome::Block {
                reason: format!("data mutation blocked: {}", class.action),
                rule: String::new(),
            };
        }

        // Every-action and plan-first gate all mutations, allow-listed or
        // not (plan-first's plan protocol itself lives in the runner).
        if matches!(
            guardrails.approval_mode,
            ApprovalMode::EveryAction | ApprovalMode::PlanFirst
        ) && class.tier != ActionTier::Read
        {
            return GateOutcome::RequireApproval {
                reason: format!(
                    "approval mode {:?} gates {}",
                    guardrails.approval_mode, class.action
                ),
                rule: String::new(),
            };
        }

        // Allow globs override the ceiling (never for data mutation).
        if any_match(&guardrails.allowed_actions, &class.action) {
            return GateOutcome::Allow {
                audited: !audited_rule.is_empty(),
                rule: audited_rule,
            };
        }

        match ceiling_verdict(ceiling, class.tier) {
            CeilingVerdict::Within => GateOutcome::Allow {
                audited: !audited_rule.is_empty(),
                rule: audited_rule,
            },
            CeilingVerdict::Escalates => match guardrails.approval_mode {
                ApprovalMode::MutationGate | ApprovalMode::PlanFirst => {
                    GateOutcome::RequireApproval {
                        reason: exceed_reason(ceiling, class),
                        rule: String::new(),
                    }
                }
                _ => GateOutcome::Escalate {
                    reason: exceed_reason(ceiling, class),
                },
            },
            CeilingVerdict::Exceeds => match guardrails.approval_mode {
                ApprovalMode::None => GateOutcome::Block {
                    reason: exceed_reason(ceiling, class),
                    rule: String::new(),
                },
                ApprovalMode::MutationGate | ApprovalMode::PlanFirst | ApprovalMode::EveryAction => {
                    GateOutcome::RequireApproval {
                        reason: exceed_reason(ceiling, class),
                        rule: String::new(),
                    }
                }
            },
        }
    }
}

impl Default for GuardrailEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// The autonomy matrix. Reads are always within; data mutation never is
/// (it is short-circuited before this point).
fn ceiling_verdict(ceiling: AutonomyLevel, tier: ActionTier) -> CeilingVerdict {
    match tier {
        ActionTier::Read => CeilingVerdict::Within,
        ActionTier::ServiceMutation => match ceiling {
            AutonomyLevel::Observe | AutonomyLevel::Recommend => CeilingVerdict::Exceeds,
            AutonomyLevel::AutomateSafe | AutonomyLevel::AutomateDestructive => {
                CeilingVerdict::Within
            }
        },
        ActionTier::DestructiveMutation => match ceiling {
            AutonomyLevel::Observe | AutonomyLevel::Recommend => CeilingVerdict::Exceeds,
            AutonomyLevel::AutomateSafe => CeilingVerdict::Escalates,
            AutonomyLevel::AutomateDestructive => CeilingVerdict::Within,
        },
        ActionTier::DataMutation => CeilingVerdict::Exceeds,
    }
}

fn exceed_reason(ceiling: AutonomyLevel, class: &Classification) -> String {
    format!(
        "{} is {} but autonomy ceiling is {}",
        class.action, class.tier, ceiling
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use legator_runtime::tools::Classification;

    fn class(tier: ActionTier, action: &str) -> Classification {
        Classification::allowed(tier, action)
    }

    fn guardrails(autonomy: AutonomyLevel, mode: ApprovalMode) -> GuardrailsSpec {
        GuardrailsSpec {
            autonomy,
            approval_mode: mode,
            ..Default::default()
        }
    }

    fn is_allow(outcome: &GateOutcome) -> bool {
        matches!(outcome, GateOutcome::Allow { .. })
    }

    #[test]
    fn reads_pass_at_every_autonomy() {
        let engine = GuardrailEngine::new();
        for ceiling in [
            AutonomyLevel::Observe,
            AutonomyLevel::Recommend,
            AutonomyLevel::AutomateSafe,
            AutonomyLevel::AutomateDestructive,
        ] {
            let g = guardrails(ceiling, ApprovalMode::None);
            let out = engine.evaluate(&g, ceiling, "kubernetes", &class(ActionTier::Read, "kubectl.get"));
            assert!(is_allow(&out), "{ceiling:?}");
        }
    }

    #[test]
    fn observe_blocks_service_mutation() {
        let engine = GuardrailEngine::new();
        let g = guardrails(AutonomyLevel::Observe, ApprovalMode::None);
        let out = engine.evaluate(
            &g,
            AutonomyLevel::Observe,
            "kubernetes",
            &class(ActionTier::ServiceMutation, "kubectl.scale"),
        );
        assert!(matches!(out, GateOutcome::Block { .. }));
    }

    #[test]
    fn automate_safe_allows_service_escalates_destructive() {
        let engine = GuardrailEngine::new();
        let g = guardrails(AutonomyLevel::AutomateSafe, ApprovalMode::None);
        assert!(is_allow(&engine.evaluate(
            &g,
            AutonomyLevel::AutomateSafe,
            "kubernetes",
            &class(ActionTier::ServiceMutation, "kubectl.scale"),
        )));
        // ssh.frobnicate has no protection rule; destructive under
        // automate-safe escalates.
        let out = engine.evaluate(
            &g,
            AutonomyLevel::AutomateSafe,
            "ssh",
            &class(ActionTier::DestructiveMutation, "ssh.frobnicate"),
        );
        assert!(matches!(out, GateOutcome::Escalate { .. }), "{out:?}");
    }

    #[test]
    fn data_mutation_is_blocked_even_at_automate_destructive() {
        let engine = GuardrailEngine::new();
        let mut g = guardrails(AutonomyLevel::AutomateDestructive, ApprovalMode::None);
        // Even an allow-list entry does not admit data mutation.
        g.allowed_actions = vec!["sql.*".to_string()];
        let out = engine.evaluate(
            &g,
            AutonomyLevel::AutomateDestructive,
            "sql",
            &class(ActionTier::DataMutation, "sql.delete"),
        );
        match out {
            GateOutcome::Block { reason, .. } => assert!(reason.contains("data mutation")),
            other => panic!("expected Block, got {other:?}"),
        }
    }

    #[test]
    fn deny_globs_override_allow_globs() {
        let engine = GuardrailEngine::new();
        let mut g = guardrails(AutonomyLevel::AutomateDestructive, ApprovalMode::None);
        g.allowed_actions = vec!["kubectl.*".to_string()];
        g.denied_actions = vec!["kubectl.scale".to_string()];
        let out = engine.evaluate(
            &g,
            AutonomyLevel::AutomateDestructive,
            "kubernetes",
            &class(ActionTier::ServiceMutation, "kubectl.scale"),
        );
        assert!(matches!(out, GateOutcome::Block { .. }));
    }

    #[test]
    fn allow_globs_override_the_ceiling() {
        let engine = GuardrailEngine::new();
        let mut g = guardrails(AutonomyLevel::Observe, ApprovalMode::None);
        g.allowed_actions = vec!["kubectl.scale".to_string()];
        let out = engine.evaluate(
            &g,
            AutonomyLevel::Observe,
            "kubernetes",
            &class(ActionTier::ServiceMutation, "kubectl.scale"),
        );
        assert!(is_allow(&out));
    }

    #[test]
    fn mutation_gate_turns_exceed_into_approval() {
        let engine = GuardrailEngine::new();
        let g = guardrails(AutonomyLevel::AutomateSafe, ApprovalMode::MutationGate);
        let out = engine.evaluate(
            &g,
            AutonomyLevel::AutomateSafe,
            "ssh",
            &class(ActionTier::DestructiveMutation, "ssh.frobnicate"),
        );
        assert!(matches!(out, GateOutcome::RequireApproval { .. }));
    }

    #[test]
    fn every_action_gates_all_mutations() {
        let engine = GuardrailEngine::new();
        let g = guardrails(AutonomyLevel::AutomateDestructive, ApprovalMode::EveryAction);
        // Within the ceiling, still gated.
        let out = engine.evaluate(
            &g,
            AutonomyLevel::AutomateDestructive,
            "kubernetes",
            &class(ActionTier::ServiceMutation, "kubectl.scale"),
        );
        assert!(matches!(out, GateOutcome::RequireApproval { .. }));
        // Reads pass.
        let out = engine.evaluate(
            &g,
            AutonomyLevel::AutomateDestructive,
            "kubernetes",
            &class(ActionTier::Read, "kubectl.get"),
        );
        assert!(is_allow(&out));
    }

    #[test]
    fn plan_first_gates_mutations_within_ceiling() {
        let engine = GuardrailEngine::new();
        let g = guardrails(AutonomyLevel::AutomateSafe, ApprovalMode::PlanFirst);
        let out = engine.evaluate(
            &g,
            AutonomyLevel::AutomateSafe,
            "kubernetes",
            &class(ActionTier::ServiceMutation, "kubectl.scale"),
        );
        assert!(matches!(out, GateOutcome::RequireApproval { .. }));
    }

    #[test]
    fn builtin_protection_forces_approval_for_kubectl_delete() {
        let engine = GuardrailEngine::new();
        let g = guardrails(AutonomyLevel::AutomateDestructive, ApprovalMode::None);
        let out = engine.evaluate(
            &g,
            AutonomyLevel::AutomateDestructive,
            "kubernetes",
            &class(ActionTier::DestructiveMutation, "kubectl.delete"),
        );
        assert!(matches!(out, GateOutcome::RequireApproval { .. }));
    }

    #[test]
    fn builtin_protection_blocks_remote_rm() {
        let engine = GuardrailEngine::new();
        let g = guardrails(AutonomyLevel::AutomateDestructive, ApprovalMode::None);
        let out = engine.evaluate(
            &g,
            AutonomyLevel::AutomateDestructive,
            "ssh",
            &class(ActionTier::DataMutation, "ssh.rm"),
        );
        assert!(matches!(out, GateOutcome::Block { .. }));
    }

    #[test]
    fn audit_rule_allows_and_records() {
        let engine = GuardrailEngine::new();
        let g = guardrails(AutonomyLevel::AutomateSafe, ApprovalMode::None);
        let out = engine.evaluate(
            &g,
            AutonomyLevel::AutomateSafe,
            "ssh",
            &class(ActionTier::ServiceMutation, "ssh.systemctl"),
        );
        match out {
            GateOutcome::Allow { audited, rule } => {
                assert!(audited);
                assert_eq!(rule, "ssh.systemctl");
            }
            other => panic!("expected audited Allow, got {other:?}"),
        }
    }

    #[test]
    fn classifier_refusal_short_circuits() {
        let engine = GuardrailEngine::new();
        let g = guardrails(AutonomyLevel::AutomateDestructive, ApprovalMode::MutationGate);
        let c = Classification::blocked(
            ActionTier::DataMutation,
            "sql.select",
            "injection indicators",
        );
        let out = engine.evaluate(&g, AutonomyLevel::AutomateDestructive, "sql", &c);
        match out {
            GateOutcome::Block { reason, .. } => assert!(reason.contains("injection")),
            other => panic!("expected Block, got {other:?}"),
        }
    }

    #[test]
    fn user_rules_cannot_weaken_builtins() {
        // A user rule trying to audit s3 deletions is shadowed by the
        // built-in block that precedes it.
        let engine = GuardrailEngine::with_user_rules(vec![ProtectionRule {
            domain: "aws".to_string(),
            pattern: "aws.s3.rm".to_string(),
            action: ProtectionAction::Audit,
            description: "weakening attempt".to_string(),
        }]);
        let g = guardrails(AutonomyLevel::AutomateDestructive, ApprovalMode::None);
        let out = engine.evaluate(
            &g,
            AutonomyLevel::AutomateDestructive,
            "aws",
            &class(ActionTier::DataMutation, "aws.s3.rm"),
        );
        assert!(matches!(out, GateOutcome::Block { .. }));
    }

    #[test]
    fn user_rules_can_add_protections() {
        let engine = GuardrailEngine::with_user_rules(vec![ProtectionRule {
            domain: "kubernetes".to_string(),
            pattern: "kubectl.scale".to_string(),
            action: ProtectionAction::Approve,
            description: "scaling requires approval here".to_string(),
        }]);
        let g = guardrails(AutonomyLevel::AutomateSafe, ApprovalMode::None);
        let out = engine.evaluate(
            &g,
            AutonomyLevel::AutomateSafe,
            "kubernetes",
            &class(ActionTier::ServiceMutation, "kubectl.scale"),
        );
        assert!(matches!(out, GateOutcome::RequireApproval { .. }));
    }
}
