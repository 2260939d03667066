//! The runner: drives one admitted run from trigger to terminal phase.
//!
//! Order of operations: create the run record, resolve the environment,
//! connectivity pre-checks, issue credentials, enter the reasoning loop
//! under a wall-clock deadline and iteration cap, then the cleanup chain.
//! Cleanup problems are recorded but never alter the terminal phase.

use crate::approval::{ApprovalManager, ApprovalParams};
use crate::error::KernelResult;
use crate::escalation::{EscalationEngine, EscalationRequest};
use crate::guardrails::{GateOutcome, GuardrailEngine};
use chrono::{DateTime, Utc};
use legator_channels::{estimate_cost, report_from_run, should_report, Reporter};
use legator_runtime::credentials::{CredentialBag, CredentialManager};
use legator_runtime::llm::{
    submit_report_descriptor, AgentTurn, Exchange, LlmDriver, ProposedToolCall, ToolDescriptor,
    TurnOutcome, TurnRequest,
};
use legator_runtime::tools::{Classification, ToolContext, ToolRegistry};
use legator_runtime::vault::VaultClient;
use legator_runtime::RuntimeError;
use legator_store::{Store, StoreError};
use legator_types::agent::{Agent, ApprovalMode, ModelTier, ReportAction, TimeoutAction};
use legator_types::approval::{ApprovalPhase, ProposedAction};
use legator_types::duration::parse_duration_or;
use legator_types::meta::{NamespacedName, ObjectMeta};
use legator_types::run::{
    run_name, ActionTier, Run, RunPhase, RunSpec, RunStatus, StepDecision, StepRecord,
    TriggerReason, UsageSummary,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pseudo-tool the model uses to satisfy plan-first mode on its first turn.
const SUBMIT_PLAN_TOOL: &str = "submit_plan";

const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(1800);
/// Base delay for transient retries, doubled per attempt.
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(8);
/// Size bound on step-log observation excerpts.
const STEP_OBSERVATION_CAP: usize = 1024;
/// Size bound on observations replayed to the model.
const TRANSCRIPT_OBSERVATION_CAP: usize = 4096;

/// Shared services a runner needs.
pub struct RunnerConfig {
    pub store: Arc<Store>,
    pub registry: Arc<ToolRegistry>,
    pub driver: Arc<dyn LlmDriver>,
    pub vault: Option<Arc<VaultClient>>,
    pub engine: Arc<GuardrailEngine>,
    pub approvals: Arc<ApprovalManager>,
}

/// Executes admitted runs.
pub struct Runner {
    cfg: RunnerConfig,
}

/// Everything the reasoning loop mutates, folded into the run status at
/// each step append and at finish.
struct LoopState {
    steps: Vec<StepRecord>,
    transcript: Vec<Exchange>,
    iterations: u32,
    tokens_in: u64,
    tokens_out: u64,
    checks_performed: u32,
    actions_blocked: u32,
    escalations_triggered: u32,
    plan_submitted: bool,
}

impl LoopState {
    fn new() -> Self {
        Self {
            steps: Vec::new(),
            transcript: Vec::new(),
            iterations: 0,
            tokens_in: 0,
            tokens_out: 0,
            checks_performed: 0,
            actions_blocked: 0,
            escalations_triggered: 0,
            plan_submitted: false,
        }
    }
}

/// How the reasoning loop ended.
struct LoopEnd {
    phase: RunPhase,
    reason: String,
    report: String,
    findings: Vec<legator_types::run::RunFinding>,
}

impl Runner {
    pub fn new(cfg: RunnerConfig) -> Self {
        Self { cfg }
    }

    /// Create the run record for an admission tick. Idempotent: re-admitting
    /// the same `(agent, trigger timestamp)` returns the existing record.
    pub fn admit(
        &self,
        agent: &Agent,
        reason: TriggerReason,
        detail: &str,
        trigger_time: DateTime<Utc>,
    ) -> KernelResult<Run> {
        let name = run_name(&agent.meta.name, trigger_time);
        let run = Run {
            meta: ObjectMeta::new(agent.meta.namespace.clone(), name.clone()),
            spec: RunSpec {
                agent_ref: agent.meta.name.clone(),
                environment_ref: agent.spec.environment_ref.clone(),
                reason,
                trigger_detail: detail.to_string(),
            },
            status: RunStatus::default(),
        };
        match self.cfg.store.runs.create(run) {
            Ok(created) => Ok(created),
            Err(StoreError::AlreadyExists { .. }) => {
                let key = NamespacedName::new(agent.meta.namespace.clone(), name);
                Ok(self.cfg.store.runs.get(&key)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drive one run to a terminal phase. Always returns a phase; internal
    /// failures map to Failed rather than propagating.
    pub async fn execute(&self, agent: &Agent, run: &Run, cancel: CancellationToken) -> RunPhase {
        let run_key = run.meta.key();
        info!(run = %run_key, agent = %agent.meta.name, reason = ?run.spec.reason, "run starting");

        // Resolve the environment snapshot.
        let env_key = NamespacedName::new(agent.meta.namespace.clone(), agent.spec.environment_ref.clone());
        let environment = match self.cfg.store.environments.get(&env_key) {
            Ok(env) => env,
            Err(e) => {
                warn!(run = %run_key, error = %e, "environment not found");
                let reporter = Reporter::new();
                return self
                    .finish(
                        agent,
                        &run_key,
                        &reporter,
                        None,
                        LoopState::new(),
                        LoopEnd {
                            phase: RunPhase::Failed,
                            reason: format!("environment: {e}"),
                            report: String::new(),
                            findings: vec![],
                        },
                        Utc::now(),
                    )
                    .await;
            }
        };
        let reporter = Reporter::from_channels(&environment.spec.channels);

        // Connectivity pre-checks are informational.
        if let Err(e) = legator_runtime::connectivity::pre_run_check(
            environment.spec.connectivity.as_ref(),
            &environment.spec.endpoints,
        )
        .await
        {
            warn!(run = %run_key, error = %e, "connectivity pre-check failed");
        }

        // Issue credentials. Failure at issue time is fatal to the run;
        // anything already issued is still revoked by the cleanup chain.
        let credentials =
            CredentialManager::new(Arc::clone(&self.cfg.store), self.cfg.vault.clone());
        let started_at = Utc::now();
        let bag = match credentials
            .issue(&agent.meta.namespace, &environment.spec.credentials)
            .await
        {
            Ok(bag) => bag,
            Err(e) => {
                warn!(run = %run_key, error = %e, "credential issuance failed");
                return self
                    .finish(
                        agent,
                        &run_key,
                        &reporter,
                        Some(&credentials),
                        LoopState::new(),
                        LoopEnd {
                            phase: RunPhase::Failed,
                            reason: format!("credentials: {e}"),
                            report: String::new(),
                            findings: vec![],
                        },
                        started_at,
                    )
                    .await;
            }
        };

        // Transition to Running under the wall-clock deadline.
        let _ = self.cfg.store.runs.update_status(&run_key, |r| {
            r.status.phase = RunPhase::Running;
            r.status.start_time = Some(started_at);
            r.status.guardrails.autonomy_ceiling = agent.spec.guardrails.autonomy.to_string();
        });

        let timeout = parse_duration_or(&agent.spec.model.timeout, DEFAULT_RUN_TIMEOUT);
        let deadline = tokio::time::Instant::now() + timeout;
        let run_cancel = cancel.child_token();
        let watchdog = {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                token.cancel();
            })
        };

        let mut state = LoopState::new();
        let end = self
            .reasoning_loop(agent, run, &environment, &bag, &run_cancel, deadline, &mut state)
            .await;
        watchdog.abort();

        self.finish(agent, &run_key, &reporter, Some(&credentials), state, end, started_at)
            .await
    }

    // -- reasoning loop -----------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn reasoning_loop(
        &self,
        agent: &Agent,
        run: &Run,
        environment: &legator_types::environment::Environment,
        bag: &CredentialBag,
        cancel: &CancellationToken,
        deadline: tokio::time::Instant,
        state: &mut LoopState,
    ) -> LoopEnd {
        let guardrails = &agent.spec.guardrails;
        let ceiling = guardrails.autonomy;
        let plan_first = guardrails.approval_mode == ApprovalMode::PlanFirst;
        let mut tools = self.cfg.registry.descriptors();
        tools.push(submit_report_descriptor());
        if plan_first {
            tools.push(submit_plan_descriptor());
        }
        let system = build_system_prompt(agent, environment);
        let task = build_task(run);

        loop {
            if state.iterations >= guardrails.max_iterations {
                return LoopEnd {
                    phase: RunPhase::Failed,
                    reason: "budget".to_string(),
                    report: String::new(),
                    findings: vec![],
                };
            }
            let budget = agent.spec.model.token_budget;
            if budget > 0 && state.tokens_in + state.tokens_out >= budget {
                return LoopEnd {
                    phase: RunPhase::Failed,
                    reason: "budget".to_string(),
                    report: String::new(),
                    findings: vec![],
                };
            }

            let request = TurnRequest {
                system: system.clone(),
                task: task.clone(),
                tools: tools.clone(),
                transcript: state.transcript.clone(),
                tier: agent.spec.model.tier,
                max_tokens: remaining_tokens(budget, state),
            };
            let outcome = match self
                .model_turn(&request, guardrails.max_retries, cancel)
                .await
            {
                Ok(outcome) => outcome,
                Err(RuntimeError::Cancelled) => return cancel_end(deadline),
                Err(e) => {
                    return LoopEnd {
                        phase: RunPhase::Failed,
                        reason: format!("model: {e}"),
                        report: String::new(),
                        findings: vec![],
                    }
                }
            };
            state.tokens_in += outcome.usage.input_tokens;
            state.tokens_out += outcome.usage.output_tokens;

            let call = match outcome.turn {
                AgentTurn::Final(report) => {
                    return LoopEnd {
                        phase: RunPhase::Succeeded,
                        reason: String::new(),
                        report: report.report,
                        findings: report.findings,
                    }
                }
                AgentTurn::Action(call) => call,
            };

            // Plan-first protocol: the first turn must be the plan.
            if plan_first && call.tool == SUBMIT_PLAN_TOOL {
                state.plan_submitted = true;
                let plan = call
                    .args
                    .get("plan")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                debug!(agent = %agent.meta.name, "plan submitted");
                self.record_step(
                    &run.meta.key(),
                    state,
                    StepRecord {
                        index: state.steps.len() as u32,
                        tool: SUBMIT_PLAN_TOOL.to_string(),
                        action: "submit_plan".to_string(),
                        tier: ActionTier::Read,
                        decision: StepDecision::Allowed,
                        matched_rule: String::new(),
                        observation: bound(&plan, STEP_OBSERVATION_CAP),
                        timestamp: Utc::now(),
                    },
                );
                state.transcript.push(Exchange {
                    call,
                    observation: "Plan accepted. Proceed.".to_string(),
                });
                state.iterations += 1;
                continue;
            }
            if plan_first && !state.plan_submitted {
                state.transcript.push(Exchange {
                    call,
                    observation: "Submit a plan with submit_plan before taking actions.".to_string(),
                });
                state.iterations += 1;
                continue;
            }

            // Gate the proposed action.
            let class = self.cfg.registry.classify(&call.tool, &call.args);
            let domain = self
                .cfg
                .registry
                .get(&call.tool)
                .map(|t| t.capability().domain)
                .unwrap_or("unknown");
            state.checks_performed += 1;
            let gate = self.cfg.engine.evaluate(guardrails, ceiling, domain, &class);
            debug!(
                run = %run.meta.name,
                action = %class.action,
                tier = %class.tier,
                gate = ?gate,
                "action gated"
            );

            match gate {
                GateOutcome::Allow { audited, rule } => {
                    let observation = match self
                        .dispatch(&call, bag, guardrails.max_retries, cancel)
                        .await
                    {
                        Ok(obs) => obs,
                        Err(RuntimeError::Cancelled) => return cancel_end(deadline),
                        // Retries exhausted: the failure goes back to the
                        // model as an observation.
                        Err(e) => format!("tool error: {e}"),
                    };
                    self.record_step(
                        &run.meta.key(),
                        state,
                        StepRecord {
                            index: state.steps.len() as u32,
                            tool: call.tool.clone(),
                            action: class.action.clone(),
                            tier: class.tier,
                            decision: if audited {
                                StepDecision::Audited
                            } else {
                                StepDecision::Allowed
                            },
                            matched_rule: rule,
                            observation: bound(&observation, STEP_OBSERVATION_CAP),
                            timestamp: Utc::now(),
                        },
                    );
                    state.transcript.push(Exchange {
                        call,
                        observation: bound(&observation, TRANSCRIPT_OBSERVATION_CAP),
                    });
                    state.iterations += 1;
                }

                GateOutcome::Block { reason, rule } => {
                    state.actions_blocked += 1;
                    self.record_step(
                        &run.meta.key(),
                        state,
                        StepRecord {
                            index: state.steps.len() as u32,
                            tool: call.tool.clone(),
                            action: class.action.clone(),
                            tier: class.tier,
                            decision: StepDecision::Blocked,
                            matched_rule: rule,
                            observation: bound(&reason, STEP_OBSERVATION_CAP),
                            timestamp: Utc::now(),
                        },
                    );
                    return LoopEnd {
                        phase: RunPhase::Blocked,
                        reason,
                        report: String::new(),
                        findings: vec![],
                    };
                }

                GateOutcome::RequireApproval { reason, rule } => {
                    match self
                        .gate_through_approval(
                            agent, run, &call, &class, &reason, &rule, bag, cancel, deadline,
                            state,
                        )
                        .await
                    {
                        ApprovalFlow::Continue => {}
                        ApprovalFlow::End(end) => return end,
                    }
                }

                GateOutcome::Escalate { reason } => {
                    state.escalations_triggered += 1;
                    let reporter = Reporter::from_channels(&environment.spec.channels);
                    let result = EscalationEngine::escalate(
                        &reporter,
                        agent,
                        EscalationRequest {
                            run_name: run.meta.name.clone(),
                            blocked_action: class.action.clone(),
                            block_reason: reason.clone(),
                            tier: class.tier,
                        },
                        cancel,
                    )
                    .await;
                    if cancel.is_cancelled() {
                        return cancel_end(deadline);
                    }
                    match result.policy {
                        TimeoutAction::Cancel => {
                            state.actions_blocked += 1;
                            self.record_step(
                                &run.meta.key(),
                                state,
                                StepRecord {
                                    index: state.steps.len() as u32,
                                    tool: call.tool.clone(),
                                    action: class.action.clone(),
                                    tier: class.tier,
                                    decision: StepDecision::Escalated,
                                    matched_rule: String::new(),
                                    observation: bound(
                                        &format!("{reason}; escalation policy cancel: action blocked"),
                                        STEP_OBSERVATION_CAP,
                                    ),
                                    timestamp: Utc::now(),
                                },
                            );
                            return LoopEnd {
                                phase: RunPhase::Escalated,
                                reason,
                                report: String::new(),
                                findings: vec![],
                            };
                        }
                        TimeoutAction::Proceed => {
                            let observation = match self
                                .dispatch(&call, bag, guardrails.max_retries, cancel)
                                .await
                            {
                                Ok(obs) => obs,
                                Err(RuntimeError::Cancelled) => return cancel_end(deadline),
                                Err(e) => format!("tool error: {e}"),
                            };
                            self.record_step(
                                &run.meta.key(),
                                state,
                                StepRecord {
                                    index: state.steps.len() as u32,
                                    tool: call.tool.clone(),
                                    action: class.action.clone(),
                                    tier: class.tier,
                                    decision: StepDecision::Escalated,
                                    matched_rule: String::new(),
                                    observation: bound(
                                        &format!("escalation timed out; policy proceed. {observation}"),
                                        STEP_OBSERVATION_CAP,
                                    ),
                                    timestamp: Utc::now(),
                                },
                            );
                            state.transcript.push(Exchange {
                                call,
                                observation: bound(&observation, TRANSCRIPT_OBSERVATION_CAP),
                            });
                            state.iterations += 1;
                        }
                        TimeoutAction::Retry => {
                            self.record_step(
                                &run.meta.key(),
                                state,
                                StepRecord {
                                    index: state.steps.len() as u32,
                                    tool: call.tool.clone(),
                                    action: class.action.clone(),
                                    tier: class.tier,
                                    decision: StepDecision::Escalated,
                                    matched_rule: String::new(),
                                    observation: bound(
                                        "escalation timed out; policy retry",
                                        STEP_OBSERVATION_CAP,
                                    ),
                                    timestamp: Utc::now(),
                                },
                            );
                            state.transcript.push(Exchange {
                                call,
                                observation: "Action escalated and not executed. You may \
                                              propose a different action."
                                    .to_string(),
                            });
                            state.iterations += 1;
                        }
                    }
                }
            }
        }
    }

    /// The approval leg of the gate: open a request, wait, then act on the
    /// decision.
    #[allow(clippy::too_many_arguments)]
    async fn gate_through_approval(
        &self,
        agent: &Agent,
        run: &Run,
        call: &ProposedToolCall,
        class: &Classification,
        reason: &str,
        rule: &str,
        bag: &CredentialBag,
        cancel: &CancellationToken,
        deadline: tokio::time::Instant,
        state: &mut LoopState,
    ) -> ApprovalFlow {
        let timeout = parse_duration_or(
            &agent.spec.guardrails.approval_timeout,
            DEFAULT_APPROVAL_TIMEOUT,
        );
        let params = ApprovalParams {
            namespace: agent.meta.namespace.clone(),
            agent_name: agent.meta.name.clone(),
            run_name: run.meta.name.clone(),
            step_index: state.steps.len() as u32,
            action: sanitized_action(call, class),
            context: reason.to_string(),
            timeout,
            channels: agent
                .spec
                .guardrails
                .escalation
                .as_ref()
                .map(|e| vec![e.channel_name.clone()])
                .unwrap_or_default(),
        };

        let outcome = match self.cfg.approvals.request_approval(params, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(run = %run.meta.name, error = %e, "approval request failed");
                state.actions_blocked += 1;
                return ApprovalFlow::End(LoopEnd {
                    phase: RunPhase::Failed,
                    reason: format!("approval: {e}"),
                    report: String::new(),
                    findings: vec![],
                });
            }
        };

        if cancel.is_cancelled() {
            return ApprovalFlow::End(cancel_end(deadline));
        }

        match outcome.phase {
            ApprovalPhase::Approved => {
                let observation = match self
                    .dispatch(call, bag, agent.spec.guardrails.max_retries, cancel)
                    .await
                {
                    Ok(obs) => obs,
                    Err(RuntimeError::Cancelled) => {
                        return ApprovalFlow::End(cancel_end(deadline))
                    }
                    Err(e) => format!("tool error: {e}"),
                };
                self.record_step(
                    &run.meta.key(),
                    state,
                    StepRecord {
                        index: state.steps.len() as u32,
                        tool: call.tool.clone(),
                        action: class.action.clone(),
                        tier: class.tier,
                        decision: StepDecision::Approved,
                        matched_rule: rule.to_string(),
                        observation: bound(
                            &format!("approved by {}. {}", outcome.decided_by, observation),
                            STEP_OBSERVATION_CAP,
                        ),
                        timestamp: Utc::now(),
                    },
                );
                state.transcript.push(Exchange {
                    call: call.clone(),
                    observation: bound(&observation, TRANSCRIPT_OBSERVATION_CAP),
                });
                state.iterations += 1;
                ApprovalFlow::Continue
            }

            ApprovalPhase::Denied => {
                state.actions_blocked += 1;
                self.record_step(
                    &run.meta.key(),
                    state,
                    StepRecord {
                        index: state.steps.len() as u32,
                        tool: call.tool.clone(),
                        action: class.action.clone(),
                        tier: class.tier,
                        decision: StepDecision::Denied,
                        matched_rule: rule.to_string(),
                        observation: bound(
                            &format!("denied by {}: {}", outcome.decided_by, outcome.reason),
                            STEP_OBSERVATION_CAP,
                        ),
                        timestamp: Utc::now(),
                    },
                );
                ApprovalFlow::End(LoopEnd {
                    phase: RunPhase::Blocked,
                    reason: format!("approval denied: {}", outcome.reason),
                    report: String::new(),
                    findings: vec![],
                })
            }

            ApprovalPhase::Expired | ApprovalPhase::Pending => {
                if cancel.is_cancelled() {
                    return ApprovalFlow::End(cancel_end(deadline));
                }
                state.escalations_triggered += 1;
                self.record_step(
                    &run.meta.key(),
                    state,
                    StepRecord {
                        index: state.steps.len() as u32,
                        tool: call.tool.clone(),
                        action: class.action.clone(),
                        tier: class.tier,
                        decision: StepDecision::Expired,
                        matched_rule: rule.to_string(),
                        observation: bound("approval timed out", STEP_OBSERVATION_CAP),
                        timestamp: Utc::now(),
                    },
                );
                // The timeout policy decides what the expiry means.
                let policy = agent
                    .spec
                    .guardrails
                    .escalation
                    .as_ref()
                    .map(|e| e.on_timeout)
                    .unwrap_or(TimeoutAction::Cancel);
                match policy {
                    TimeoutAction::Cancel => {
                        state.actions_blocked += 1;
                        ApprovalFlow::End(LoopEnd {
                            phase: RunPhase::Escalated,
                            reason: "approval timed out".to_string(),
                            report: String::new(),
                            findings: vec![],
                        })
                    }
                    TimeoutAction::Proceed => {
                        let observation = match self
                            .dispatch(call, bag, agent.spec.guardrails.max_retries, cancel)
                            .await
                        {
                            Ok(obs) => obs,
                            Err(RuntimeError::Cancelled) => {
                                return ApprovalFlow::End(cancel_end(deadline))
                            }
                            Err(e) => format!("tool error: {e}"),
                        };
                        state.transcript.push(Exchange {
                            call: call.clone(),
                            observation: bound(&observation, TRANSCRIPT_OBSERVATION_CAP),
                        });
                        state.iterations += 1;
                        ApprovalFlow::Continue
                    }
                    TimeoutAction::Retry => {
                        state.transcript.push(Exchange {
                            call: call.clone(),
                            observation: "Approval expired; the action was not executed. \
                                          You may propose a different action."
                                .to_string(),
                        });
                        state.iterations += 1;
                        ApprovalFlow::Continue
                    }
                }
            }
        }
    }

    // -- dispatch helpers ---------------------------------------------------

    /// One model turn with transient-only retries.
    async fn model_turn(
        &self,
        request: &TurnRequest,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, RuntimeError> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
                r = self.cfg.driver.next_turn(request) => r,
            };
            match result {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt < max_retries => {
                    attempt += 1;
                    debug!(attempt, error = %e, "transient model error, retrying");
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Execute a tool call with transient-only retries. Classification
    /// blocks never reach this point, so nothing here is retried for
    /// policy reasons.
    async fn dispatch(
        &self,
        call: &ProposedToolCall,
        bag: &CredentialBag,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<String, RuntimeError> {
        let ctx = ToolContext {
            credentials: bag,
            cancel,
        };
        let mut attempt = 0u32;
        loop {
            match self.cfg.registry.execute(&call.tool, &ctx, &call.args).await {
                Ok(obs) => return Ok(obs),
                Err(e) if e.is_transient() && attempt < max_retries => {
                    attempt += 1;
                    debug!(tool = %call.tool, attempt, error = %e, "transient tool error, retrying");
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Append a step to the run's log and fold counters into its status.
    fn record_step(&self, run_key: &NamespacedName, state: &mut LoopState, step: StepRecord) {
        state.steps.push(step.clone());
        let checks = state.checks_performed;
        let blocked = state.actions_blocked;
        let escalations = state.escalations_triggered;
        let _ = self.cfg.store.runs.update_status(run_key, |r| {
            r.status.steps.push(step.clone());
            r.status.guardrails.checks_performed = checks;
            r.status.guardrails.actions_blocked = blocked;
            r.status.guardrails.escalations_triggered = escalations;
        });
    }

    // -- completion ---------------------------------------------------------

    /// Write the terminal phase, then run the cleanup chain: credential
    /// revocation and key zeroing, then notification. Every link runs
    /// regardless of earlier link failures; errors are recorded in the run
    /// status and never change the phase.
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        agent: &Agent,
        run_key: &NamespacedName,
        reporter: &Reporter,
        credentials: Option<&CredentialManager>,
        state: LoopState,
        end: LoopEnd,
        started_at: DateTime<Utc>,
    ) -> RunPhase {
        let completed_at = Utc::now();
        let wall_clock_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;

        // A run may not reach Succeeded carrying an unapproved data
        // mutation.
        let mut phase = end.phase;
        if phase == RunPhase::Succeeded
            && state.steps.iter().any(|s| {
                s.tier == ActionTier::DataMutation && s.decision == StepDecision::Allowed
            })
        {
            warn!(run = %run_key, "unapproved data mutation detected at exit, forcing Blocked");
            phase = RunPhase::Blocked;
        }

        let mut cleanup_errors = Vec::new();

        // Credential revocation runs to completion even under cancellation.
        if let Some(credentials) = credentials {
            cleanup_errors.extend(credentials.cleanup().await);
        }

        let (input_rate, output_rate) = tier_rates(agent.spec.model.tier);
        let mut usage = UsageSummary {
            tokens_in: state.tokens_in,
            tokens_out: state.tokens_out,
            total_tokens: state.tokens_in + state.tokens_out,
            iterations: state.iterations,
            wall_clock_ms,
            estimated_cost: String::new(),
        };
        usage.estimated_cost = estimate_cost(&usage, input_rate, output_rate);

        let updated = self.cfg.store.runs.update_status(run_key, |r| {
            r.status.phase = phase;
            r.status.completion_time = Some(completed_at);
            r.status.report = end.report.clone();
            r.status.reason = end.reason.clone();
            r.status.findings = end.findings.clone();
            r.status.usage = usage.clone();
            r.status.guardrails.checks_performed = state.checks_performed;
            r.status.guardrails.actions_blocked = state.actions_blocked;
            r.status.guardrails.escalations_triggered = state.escalations_triggered;
        });

        // Notification, per the agent's reporting policy.
        if let Ok(run) = &updated {
            let (send, action) = should_report(agent.spec.reporting.as_ref(), run);
            match (send, action) {
                (false, _) => {}
                (true, ReportAction::Log) => {
                    info!(
                        run = %run_key,
                        phase = ?phase,
                        findings = run.status.findings.len(),
                        "run outcome"
                    );
                }
                (true, ReportAction::Notify) | (true, ReportAction::Escalate) => {
                    let report = report_from_run(agent, run);
                    for e in reporter.send_to_all(&report).await {
                        cleanup_errors.push(format!("notify: {e}"));
                    }
                }
                (true, ReportAction::Silent) => {}
            }
        }

        if !cleanup_errors.is_empty() {
            let _ = self.cfg.store.runs.update_status(run_key, |r| {
                r.status.cleanup_errors = cleanup_errors.clone();
            });
        }

        // Agent bookkeeping: failure streak and surface phase.
        let agent_key = agent.meta.key();
        let _ = self.cfg.store.agents.update_status(&agent_key, |a| {
            if phase == RunPhase::Failed {
                a.status.consecutive_failures += 1;
                a.status.phase = legator_types::agent::AgentPhase::Error;
            } else {
                a.status.consecutive_failures = 0;
                a.status.phase = legator_types::agent::AgentPhase::Ready;
            }
        });

        info!(run = %run_key, phase = ?phase, reason = %end.reason, "run finished");
        phase
    }
}

/// Control flow out of the approval leg.
enum ApprovalFlow {
    Continue,
    End(LoopEnd),
}

fn cancel_end(deadline: tokio::time::Instant) -> LoopEnd {
    let reason = if tokio::time::Instant::now() >= deadline {
        "timeout".to_string()
    } else {
        "cancelled".to_string()
    };
    LoopEnd {
        phase: RunPhase::Failed,
        reason,
        report: String::new(),
        findings: vec![],
    }
}

/// Per-million-token USD pricing for each model tier, for the usage cost
/// estimate surfaced in reports.
fn tier_rates(tier: ModelTier) -> (f64, f64) {
    match tier {
        ModelTier::Fast => (0.25, 1.25),
        ModelTier::Standard => (3.00, 15.00),
        ModelTier::Reasoning => (5.00, 25.00),
    }
}

fn backoff(attempt: u32) -> Duration {
    let delay = RETRY_BASE * 2u32.saturating_pow(attempt.saturating_sub(1));
    delay.min(RETRY_CAP)
}

fn remaining_tokens(budget: u64, state: &LoopState) -> u64 {
    if budget == 0 {
        return 4096;
    }
    budget
        .saturating_sub(state.tokens_in + state.tokens_out)
        .clamp(1, 32_000)
}

fn bound(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

/// Sanitized copy of the proposed action for the approver. Secret-bearing
/// argument names are dropped; values are size-bounded.
fn sanitized_action(call: &ProposedToolCall, class: &Classification) -> ProposedAction {
    let mut args = BTreeMap::new();
    if let Some(map) = call.args.as_object() {
        for (k, v) in map {
            let lowered = k.to_ascii_lowercase();
            if lowered.contains("password") || lowered.contains("secret") || lowered.contains("token")
            {
                continue;
            }
            let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
            args.insert(k.clone(), bound(&value, 128));
        }
    }
    ProposedAction {
        tool: call.tool.clone(),
        tier: class.tier,
        target: class.target.clone(),
        description: class.description.clone(),
        args,
    }
}

fn build_system_prompt(agent: &Agent, environment: &legator_types::environment::Environment) -> String {
    let mut prompt = format!(
        "You are {}, an autonomous infrastructure agent.\n{}\n\n\
         Autonomy level: {}. Propose one tool call at a time; finish with \
         submit_report.",
        agent.meta.name, agent.spec.description, agent.spec.guardrails.autonomy
    );
    if !agent.spec.skills.is_empty() {
        let names: Vec<&str> = agent.spec.skills.iter().map(|s| s.name.as_str()).collect();
        prompt.push_str(&format!("\nSkills: {}.", names.join(", ")));
    }
    if !environment.spec.endpoints.is_empty() {
        let names: Vec<&str> = environment.spec.endpoints.keys().map(String::as_str).collect();
        prompt.push_str(&format!("\nEndpoints: {}.", names.join(", ")));
    }
    if !environment.spec.credentials.is_empty() {
        let names: Vec<&str> = environment.spec.credentials.keys().map(String::as_str).collect();
        prompt.push_str(&format!(
            "\nCredential handles (values are injected, never visible): {}.",
            names.join(", ")
        ));
    }
    prompt
}

fn build_task(run: &Run) -> String {
    match run.spec.reason {
        TriggerReason::Scheduled => "Scheduled inspection. Carry out your mission.".to_string(),
        TriggerReason::Webhook | TriggerReason::Event => format!(
            "Triggered by {:?}. Payload:\n{}",
            run.spec.reason,
            bound(&run.spec.trigger_detail, 4096)
        ),
        TriggerReason::Manual => "Manually triggered run. Carry out your mission.".to_string(),
    }
}

fn submit_plan_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: SUBMIT_PLAN_TOOL.to_string(),
        description: "Submit your plan for this run. Required before any other action."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "plan": {"type": "string", "description": "Numbered steps you intend to take."}
            },
            "required": ["plan"]
        }),
    }
}
