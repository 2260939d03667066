//! The ApprovalRequest resource — a proposed action waiting on a human.

use crate::meta::ObjectMeta;
use crate::run::ActionTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle of an approval request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalPhase {
    #[default]
    Pending,
    Approved,
    Denied,
    Expired,
}

/// What the agent wants to do, sanitized for a human approver.
/// Never carries credential values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Tool name, e.g. `"kubectl.delete"`.
    pub tool: String,
    pub tier: ActionTier,
    /// What the action targets, e.g. `"deployment/nginx"`.
    pub target: String,
    pub description: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

/// A proposed action awaiting a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequestSpec {
    pub agent_name: String,
    pub run_name: String,
    pub action: ProposedAction,
    /// Additional context for the approver.
    #[serde(default)]
    pub context: String,
    /// How long to wait before the request expires, as a duration string.
    #[serde(default)]
    pub timeout: String,
    /// Channels to notify about this request.
    #[serde(default)]
    pub channels: Vec<String>,
}

/// The decision record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalRequestStatus {
    pub phase: ApprovalPhase,
    /// Who decided (OIDC subject, or `"system"` for a timeout expiry).
    pub decided_by: String,
    pub decided_at: Option<DateTime<Utc>>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub meta: ObjectMeta,
    pub spec: ApprovalRequestSpec,
    #[serde(default)]
    pub status: ApprovalRequestStatus,
}
