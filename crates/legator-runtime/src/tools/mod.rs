//! Guardrailed tools.
//!
//! Every tool declares a capability (domain + producible tiers) and
//! classifies each proposed call into exactly one action tier from a static
//! table. Classification is a pure function of the arguments and is
//! fail-closed: unknown verbs land in destructive-mutation.

pub mod aws;
pub mod azure;
pub mod dns;
pub mod http;
pub mod kubectl;
pub mod shell;
pub mod sql;

use crate::credentials::CredentialBag;
use crate::error::{RuntimeError, RuntimeResult};
use crate::llm::ToolDescriptor;
use async_trait::async_trait;
use legator_types::run::ActionTier;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a tool is allowed to touch.
#[derive(Debug, Clone)]
pub struct ToolCapability {
    /// Domain label used by protection rules (`kubernetes`, `ssh`, `sql`,
    /// `http`, `dns`, `aws`, `azure`).
    pub domain: &'static str,
    /// Tiers this tool can produce.
    pub tiers: &'static [ActionTier],
    pub requires_credentials: bool,
}

/// The classifier's verdict on one proposed call.
#[derive(Debug, Clone)]
pub struct Classification {
    pub tier: ActionTier,
    /// Canonical `<tool>.<verb>` key used for glob matching
    /// (e.g. `"kubectl.delete"`, `"aws.s3.rm"`).
    pub action: String,
    /// Set when the classifier itself refuses the call (e.g. SQL injection
    /// indicators). Blocked classifications never reach dispatch.
    pub blocked: bool,
    pub block_reason: String,
    /// What the action targets, for the approver.
    pub target: String,
    pub description: String,
}

impl Classification {
    pub fn allowed(tier: ActionTier, action: impl Into<String>) -> Self {
        let action = action.into();
        Self {
            tier,
            description: action.clone(),
            action,
            blocked: false,
            block_reason: String::new(),
            target: String::new(),
        }
    }

    pub fn blocked(tier: ActionTier, action: impl Into<String>, reason: impl Into<String>) -> Self {
        let action = action.into();
        Self {
            tier,
            description: action.clone(),
            action,
            blocked: true,
            block_reason: reason.into(),
            target: String::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }
}

/// Per-call execution context. Credentials reach the tool here and only
/// here; the model sees handle names, never values.
pub struct ToolContext<'a> {
    pub credentials: &'a CredentialBag,
    pub cancel: &'a CancellationToken,
}

/// A guardrailed tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON Schema for the arguments.
    fn parameters(&self) -> serde_json::Value;
    fn capability(&self) -> ToolCapability;
    /// Pure classification of a proposed call.
    fn classify(&self, args: &serde_json::Value) -> Classification;
    async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        args: &serde_json::Value,
    ) -> RuntimeResult<String>;
}

/// Registry of available tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(kubectl::KubectlTool::new()));
        reg.register(Arc::new(shell::SshExecTool::new()));
        reg.register(Arc::new(sql::SqlTool::new()));
        reg.register(Arc::new(http::HttpTool::new()));
        reg.register(Arc::new(dns::DnsTool::new()));
        reg.register(Arc::new(aws::AwsCliTool::new(String::new())));
        reg.register(Arc::new(azure::AzureCliTool::new()));
        reg
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    /// Provider-neutral descriptors for the LLM driver.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// Classify a proposed call. Unknown tools are fail-closed.
    pub fn classify(&self, tool: &str, args: &serde_json::Value) -> Classification {
        match self.tools.get(tool) {
            Some(t) => t.classify(args),
            None => Classification::blocked(
                ActionTier::DestructiveMutation,
                tool.to_string(),
                format!("unknown tool {tool:?}"),
            ),
        }
    }

    pub async fn execute(
        &self,
        tool: &str,
        ctx: &ToolContext<'_>,
        args: &serde_json::Value,
    ) -> RuntimeResult<String> {
        let t = self
            .tools
            .get(tool)
            .ok_or_else(|| RuntimeError::tool(tool, "unknown tool"))?;
        t.execute(ctx, args).await
    }
}

/// Bound an observation for the step log and the model transcript.
pub fn truncate_output(output: String, max: usize) -> String {
    if output.len() <= max {
        return output;
    }
    let mut end = max;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (truncated, {} total bytes)", &output[..end], output.len())
}

/// Extract a string argument, empty when absent.
pub(crate) fn str_arg<'a>(args: &'a serde_json::Value, key: &str) -> &'a str {
    args.get(key).and_then(|v| v.as_str()).unwrap_or("")
}
