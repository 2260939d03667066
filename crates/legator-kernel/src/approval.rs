//! The approval manager: persist a proposed action and wait, with a
//! bounded timeout, for a human decision.

use legator_store::{Store, StoreResult};
use legator_types::approval::{
    ApprovalPhase, ApprovalRequest, ApprovalRequestSpec, ApprovalRequestStatus, ProposedAction,
};
use legator_types::meta::{sanitize_name, NamespacedName, ObjectMeta};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// What to ask approval for.
#[derive(Debug, Clone)]
pub struct ApprovalParams {
    pub namespace: String,
    pub agent_name: String,
    pub run_name: String,
    /// Ordinal of the gated step, for a unique request name.
    pub step_index: u32,
    pub action: ProposedAction,
    pub context: String,
    pub timeout: Duration,
    pub channels: Vec<String>,
}

/// The decision, as observed by the waiting run.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub phase: ApprovalPhase,
    pub decided_by: String,
    pub reason: String,
    /// Name of the persisted request, for the step log.
    pub request_name: String,
}

impl ApprovalOutcome {
    pub fn approved(&self) -> bool {
        self.phase == ApprovalPhase::Approved
    }
}

/// Creates approval requests and polls for decisions.
pub struct ApprovalManager {
    store: Arc<Store>,
    poll_interval: Duration,
}

impl ApprovalManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Shorten the poll interval (tests).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Create a Pending request and wait for one of: Approved, Denied,
    /// timeout (writes Expired with decider `"system"`), or caller
    /// cancellation (returns Expired without writing — the record belongs
    /// to the next observer).
    pub async fn request_approval(
        &self,
        params: ApprovalParams,
        cancel: &CancellationToken,
    ) -> StoreResult<ApprovalOutcome> {
        let name = request_name(&params.run_name, &params.action.tool, params.step_index);
        let key = NamespacedName::new(params.namespace.clone(), name.clone());

        let request = ApprovalRequest {
            meta: ObjectMeta::new(params.namespace.clone(), name.clone()),
            spec: ApprovalRequestSpec {
                agent_name: params.agent_name.clone(),
                run_name: params.run_name.clone(),
                action: params.action.clone(),
                context: params.context.clone(),
                timeout: format!("{}s", params.timeout.as_secs()),
                channels: params.channels.clone(),
            },
            status: ApprovalRequestStatus::default(),
        };
        self.store.approvals.create(request)?;
        info!(
            approval = %key,
            agent = %params.agent_name,
            tool = %params.action.tool,
            tier = %params.action.tier,
            "approval request created"
        );

        let deadline = tokio::time::Instant::now() + params.timeout;
        loop {
            let current = self.store.approvals.get(&key)?;
            match current.status.phase {
                ApprovalPhase::Approved => {
                    debug!(approval = %key, decided_by = %current.status.decided_by, "approved");
                    return Ok(ApprovalOutcome {
                        phase: ApprovalPhase::Approved,
                        decided_by: current.status.decided_by,
                        reason: current.status.reason,
                        request_name: name,
                    });
                }
                ApprovalPhase::Denied => {
                    debug!(approval = %key, decided_by = %current.status.decided_by, "denied");
                    return Ok(ApprovalOutcome {
                        phase: ApprovalPhase::Denied,
                        decided_by: current.status.decided_by,
                        reason: current.status.reason,
                        request_name: name,
                    });
                }
                // Someone else expired it; treat like our own timeout.
                ApprovalPhase::Expired => {
                    return Ok(ApprovalOutcome {
                        phase: ApprovalPhase::Expired,
                        decided_by: current.status.decided_by,
                        reason: current.status.reason,
                        request_name: name,
                    });
                }
                ApprovalPhase::Pending => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    // Cancellation during the wait: report Expired but do
                    // not write it.
                    return Ok(ApprovalOutcome {
                        phase: ApprovalPhase::Expired,
                        decided_by: String::new(),
                        reason: "run cancelled while waiting".to_string(),
                        request_name: name,
                    });
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.store.approvals.update_status(&key, |r| {
                        r.status.phase = ApprovalPhase::Expired;
                        r.status.decided_by = "system".to_string();
                        r.status.decided_at = Some(Utc::now());
                        r.status.reason = "approval timed out".to_string();
                    })?;
                    info!(approval = %key, "approval expired");
                    return Ok(ApprovalOutcome {
                        phase: ApprovalPhase::Expired,
                        decided_by: "system".to_string(),
                        reason: "approval timed out".to_string(),
                        request_name: name,
                    });
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

/// Store-safe request name: run, tool (dots become dashes), step ordinal.
fn request_name(run_name: &str, tool: &str, step_index: u32) -> String {
    sanitize_name(&format!("{run_name}-{tool}-{step_index}"))
}
