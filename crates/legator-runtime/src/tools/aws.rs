//! aws.cli tool — guardrailed AWS operations via the aws binary.
//!
//! `service.command` pairs are classified from static tables. Reads are
//! recognized by the CLI's describe/list/get verb prefixes; anything not
//! matched by a table or a read verb is fail-closed to destructive-mutation.
//! S3 and DynamoDB deletions touch stored user data and are data-mutations.

use crate::error::{RuntimeError, RuntimeResult};
use crate::tools::kubectl::run_command;
use crate::tools::{str_arg, Classification, Tool, ToolCapability, ToolContext};
use async_trait::async_trait;
use legator_types::run::ActionTier;

/// Destroys infrastructure resources.
const DESTRUCTIVE: &[&str] = &[
    "ec2.terminate-instances",
    "ec2.delete-security-group",
    "ec2.delete-vpc",
    "ec2.delete-subnet",
    "rds.delete-db-instance",
    "rds.delete-db-cluster",
    "iam.delete-user",
    "iam.delete-role",
    "iam.delete-policy",
    "iam.put-user-policy",
    "iam.attach-role-policy",
    "iam.create-access-key",
    "lambda.delete-function",
    "ecs.delete-cluster",
    "ecs.delete-service",
    "cloudformation.delete-stack",
];

/// Destroys stored user data. Always gated.
const DATA_MUTATION: &[&str] = &[
    "s3.rb",
    "s3.rm",
    "s3api.delete-bucket",
    "s3api.delete-object",
    "s3api.delete-objects",
    "dynamodb.delete-table",
    "dynamodb.delete-item",
    "rds.delete-db-snapshot",
    "rds.delete-db-cluster-snapshot",
];

/// Reversible operational changes.
const SERVICE_MUTATION: &[&str] = &[
    "ec2.start-instances",
    "ec2.stop-instances",
    "ec2.reboot-instances",
    "ec2.create-security-group",
    "ec2.authorize-security-group-ingress",
    "ec2.revoke-security-group-ingress",
    "ecs.update-service",
    "lambda.update-function-code",
    "lambda.update-function-configuration",
    "rds.reboot-db-instance",
    "rds.modify-db-instance",
    "autoscaling.set-desired-capacity",
    "autoscaling.update-auto-scaling-group",
];

/// Read-only verb prefixes of the AWS CLI.
const READ_PREFIXES: &[&str] = &["describe-", "list-", "get-", "head-"];

/// Read-only exact commands (the s3 convenience verbs).
const READ_COMMANDS: &[&str] = &["ls", "presign"];

/// Classify an AWS `service.command` pair. Fail-closed: commands matched
/// by no table and no read verb are destructive.
pub fn classify_aws(service: &str, command: &str) -> ActionTier {
    let command = command.to_ascii_lowercase();
    let key = format!("{}.{}", service.to_ascii_lowercase(), command);
    if DATA_MUTATION.contains(&key.as_str()) {
        ActionTier::DataMutation
    } else if DESTRUCTIVE.contains(&key.as_str()) {
        ActionTier::DestructiveMutation
    } else if SERVICE_MUTATION.contains(&key.as_str()) {
        ActionTier::ServiceMutation
    } else if READ_PREFIXES.iter().any(|p| command.starts_with(p))
        || READ_COMMANDS.contains(&command.as_str())
    {
        ActionTier::Read
    } else {
        ActionTier::DestructiveMutation
    }
}

/// Wraps the AWS CLI. Credentials are injected via the environment (IRSA or
/// Vault-sourced env vars), never through arguments.
pub struct AwsCliTool {
    region: String,
}

impl AwsCliTool {
    pub fn new(region: String) -> Self {
        Self { region }
    }
}

#[async_trait]
impl Tool for AwsCliTool {
    fn name(&self) -> &'static str {
        "aws.cli"
    }

    fn description(&self) -> &'static str {
        "Execute AWS CLI commands. Read-only by default; mutations require \
         appropriate autonomy. Credentials are injected automatically."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "service": {"type": "string", "description": "AWS service (ec2, s3, iam, rds, ...)"},
                "command": {"type": "string", "description": "CLI command (describe-instances, list-buckets, ...)"},
                "args": {"type": "string", "description": "additional arguments"}
            },
            "required": ["service", "command"]
        })
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability {
            domain: "aws",
            tiers: &[
                ActionTier::Read,
                ActionTier::ServiceMutation,
                ActionTier::DestructiveMutation,
                ActionTier::DataMutation,
            ],
            requires_credentials: true,
        }
    }

    fn classify(&self, args: &serde_json::Value) -> Classification {
        let service = str_arg(args, "service").to_ascii_lowercase();
        let command = str_arg(args, "command").to_ascii_lowercase();
        let tier = classify_aws(&service, &command);
        Classification::allowed(tier, format!("aws.{service}.{command}"))
            .with_target(format!("{service} {command}"))
    }

    async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        args: &serde_json::Value,
    ) -> RuntimeResult<String> {
        let service = str_arg(args, "service");
        let command = str_arg(args, "command");
        if service.is_empty() || command.is_empty() {
            return Err(RuntimeError::tool("aws.cli", "service and command are required"));
        }

        let mut cmd_args: Vec<&str> = vec![service, command];
        if !self.region.is_empty() {
            cmd_args.push("--region");
            cmd_args.push(&self.region);
        }
        cmd_args.push("--output");
        cmd_args.push("json");
        let extra = str_arg(args, "args");
        cmd_args.extend(extra.split_whitespace());

        run_command(ctx, "aws", &cmd_args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_mutations_always_gated() {
        assert_eq!(classify_aws("s3", "rm"), ActionTier::DataMutation);
        assert_eq!(classify_aws("s3api", "delete-object"), ActionTier::DataMutation);
        assert_eq!(classify_aws("dynamodb", "delete-table"), ActionTier::DataMutation);
    }

    #[test]
    fn destructive() {
        assert_eq!(
            classify_aws("ec2", "terminate-instances"),
            ActionTier::DestructiveMutation
        );
        assert_eq!(classify_aws("iam", "delete-role"), ActionTier::DestructiveMutation);
    }

    #[test]
    fn service_mutations() {
        assert_eq!(classify_aws("ec2", "stop-instances"), ActionTier::ServiceMutation);
        assert_eq!(classify_aws("ecs", "update-service"), ActionTier::ServiceMutation);
    }

    #[test]
    fn read_verbs_are_read() {
        assert_eq!(classify_aws("ec2", "describe-instances"), ActionTier::Read);
        assert_eq!(classify_aws("s3", "ls"), ActionTier::Read);
        assert_eq!(classify_aws("s3api", "list-objects"), ActionTier::Read);
        assert_eq!(classify_aws("s3api", "head-object"), ActionTier::Read);
        assert_eq!(classify_aws("cloudwatch", "get-metric-data"), ActionTier::Read);
    }

    #[test]
    fn unknown_command_fails_closed() {
        assert_eq!(
            classify_aws("ec2", "frobnicate-instances"),
            ActionTier::DestructiveMutation
        );
        // Real mutations missing from the tables must not pass as reads.
        assert_eq!(classify_aws("s3", "sync"), ActionTier::DestructiveMutation);
        assert_eq!(classify_aws("s3", "mv"), ActionTier::DestructiveMutation);
    }

    #[test]
    fn action_key_shape() {
        let tool = AwsCliTool::new(String::new());
        let c = tool.classify(&serde_json::json!({"service": "S3", "command": "RM"}));
        assert_eq!(c.action, "aws.s3.rm");
        assert_eq!(c.tier, ActionTier::DataMutation);
    }
}
