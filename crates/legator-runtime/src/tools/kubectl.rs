//! kubectl tool — guardrailed Kubernetes operations via the kubectl binary.

use crate::error::{RuntimeError, RuntimeResult};
use crate::tools::{str_arg, truncate_output, Classification, Tool, ToolCapability, ToolContext};
use async_trait::async_trait;
use legator_types::run::ActionTier;
use std::time::Duration;
use tokio::process::Command;

const EXEC_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_OUTPUT: usize = 8192;

/// Verbs with no state change.
const READ_VERBS: &[&str] = &[
    "get",
    "describe",
    "logs",
    "top",
    "explain",
    "api-resources",
    "api-versions",
    "version",
    "diff",
    "events",
];

/// Reversible operational changes.
const SERVICE_VERBS: &[&str] = &[
    "scale",
    "rollout",
    "annotate",
    "label",
    "cordon",
    "uncordon",
    "expose",
    "set",
    "patch",
    "apply",
];

/// Destroys resources (but not stored user data).
const DESTRUCTIVE_VERBS: &[&str] = &["delete", "drain", "replace", "evict", "taint"];

pub struct KubectlTool;

impl KubectlTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KubectlTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify a kubectl verb + resource pair.
///
/// Secret deletion touches persisted sensitive data and is tiered as
/// data-mutation; any unknown verb is fail-closed to destructive-mutation.
pub fn classify_kubectl(verb: &str, resource: &str) -> ActionTier {
    let verb = verb.to_ascii_lowercase();
    let resource = resource.to_ascii_lowercase();

    if verb == "delete" && (resource.starts_with("secret") || resource.starts_with("pvc")
        || resource.starts_with("persistentvolumeclaim"))
    {
        return ActionTier::DataMutation;
    }
    if READ_VERBS.contains(&verb.as_str()) {
        return ActionTier::Read;
    }
    if SERVICE_VERBS.contains(&verb.as_str()) {
        return ActionTier::ServiceMutation;
    }
    if DESTRUCTIVE_VERBS.contains(&verb.as_str()) {
        return ActionTier::DestructiveMutation;
    }
    // Fail closed.
    ActionTier::DestructiveMutation
}

#[async_trait]
impl Tool for KubectlTool {
    fn name(&self) -> &'static str {
        "kubectl"
    }

    fn description(&self) -> &'static str {
        "Run kubectl against the bound cluster. Reads are always permitted; \
         mutations are subject to the agent's autonomy level."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "verb": {"type": "string", "description": "kubectl verb (get, describe, scale, delete, ...)"},
                "resource": {"type": "string", "description": "resource kind, e.g. pods or deployment/foo"},
                "name": {"type": "string", "description": "resource name, if not part of resource"},
                "namespace": {"type": "string"},
                "args": {"type": "string", "description": "additional flags"}
            },
            "required": ["verb", "resource"]
        })
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability {
            domain: "kubernetes",
            tiers: &[
                ActionTier::Read,
                ActionTier::ServiceMutation,
                ActionTier::DestructiveMutation,
                ActionTier::DataMutation,
            ],
            requires_credentials: false,
        }
    }

    fn classify(&self, args: &serde_json::Value) -> Classification {
        let verb = str_arg(args, "verb");
        let resource = str_arg(args, "resource");
        let name = str_arg(args, "name");
        let tier = classify_kubectl(verb, resource);
        let target = if name.is_empty() {
            resource.to_string()
        } else {
            format!("{resource}/{name}")
        };
        Classification::allowed(tier, format!("kubectl.{}", verb.to_ascii_lowercase()))
            .with_target(target)
    }

    async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        args: &serde_json::Value,
    ) -> RuntimeResult<String> {
        let verb = str_arg(args, "verb");
        let resource = str_arg(args, "resource");
        if verb.is_empty() || resource.is_empty() {
            return Err(RuntimeError::tool("kubectl", "verb and resource are required"));
        }

        let mut cmd_args: Vec<&str> = vec![verb, resource];
        let name = str_arg(args, "name");
        if !name.is_empty() {
            cmd_args.push(name);
        }
        let namespace = str_arg(args, "namespace");
        if !namespace.is_empty() {
            cmd_args.push("-n");
            cmd_args.push(namespace);
        }
        let extra = str_arg(args, "args");
        let extra_split: Vec<&str> = extra.split_whitespace().collect();
        cmd_args.extend(extra_split);

        run_command(ctx, "kubectl", &cmd_args).await
    }
}

/// Run a local binary with a timeout and bounded output, honouring
/// cancellation. Shared by the CLI-wrapping tools.
pub(crate) async fn run_command(
    ctx: &ToolContext<'_>,
    program: &str,
    args: &[&str],
) -> RuntimeResult<String> {
    let fut = Command::new(program).args(args).output();

    let output = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(RuntimeError::Cancelled),
        out = tokio::time::timeout(EXEC_TIMEOUT, fut) => match out {
            Err(_) => {
                return Err(RuntimeError::tool_transient(
                    program,
                    format!("timed out after {}s", EXEC_TIMEOUT.as_secs()),
                ))
            }
            Ok(Err(e)) => return Err(RuntimeError::tool(program, format!("spawn failed: {e}"))),
            Ok(Ok(out)) => out,
        },
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Ok(format!(
            "Error: exit status {}\n{}",
            output.status.code().unwrap_or(-1),
            truncate_output(stderr.into_owned(), 2048)
        ));
    }
    Ok(truncate_output(stdout, MAX_OUTPUT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_read() {
        for verb in ["get", "describe", "logs", "top"] {
            assert_eq!(classify_kubectl(verb, "pods"), ActionTier::Read, "{verb}");
        }
    }

    #[test]
    fn service_mutations() {
        for verb in ["scale", "rollout", "cordon", "apply"] {
            assert_eq!(
                classify_kubectl(verb, "deployment/foo"),
                ActionTier::ServiceMutation,
                "{verb}"
            );
        }
    }

    #[test]
    fn deletes_are_destructive() {
        assert_eq!(
            classify_kubectl("delete", "deployment/foo"),
            ActionTier::DestructiveMutation
        );
        assert_eq!(classify_kubectl("drain", "node/n1"), ActionTier::DestructiveMutation);
    }

    #[test]
    fn secret_and_pvc_deletion_is_data_mutation() {
        assert_eq!(classify_kubectl("delete", "secret/db-creds"), ActionTier::DataMutation);
        assert_eq!(classify_kubectl("delete", "pvc/data-0"), ActionTier::DataMutation);
    }

    #[test]
    fn unknown_verb_fails_closed() {
        assert_eq!(
            classify_kubectl("teleport", "pods"),
            ActionTier::DestructiveMutation
        );
    }

    #[test]
    fn classification_carries_action_key_and_target() {
        let tool = KubectlTool::new();
        let c = tool.classify(&serde_json::json!({
            "verb": "delete", "resource": "deployment", "name": "foo"
        }));
        assert_eq!(c.action, "kubectl.delete");
        assert_eq!(c.target, "deployment/foo");
    }
}
