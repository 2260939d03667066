//! az.cli tool — guardrailed Azure operations via the az binary.
//!
//! `group.command` pairs are classified from static tables. Reads are the
//! list/show/get verbs; anything not matched by a table or a read verb is
//! fail-closed to destructive-mutation.

use crate::error::{RuntimeError, RuntimeResult};
use crate::tools::kubectl::run_command;
use crate::tools::{str_arg, Classification, Tool, ToolCapability, ToolContext};
use async_trait::async_trait;
use legator_types::run::ActionTier;

const DESTRUCTIVE: &[&str] = &[
    "vm.delete",
    "group.delete",
    "aks.delete",
    "network.vnet.delete",
    "network.nsg.delete",
    "role.assignment.delete",
    "role.definition.delete",
    "ad.sp.delete",
    "functionapp.delete",
    "webapp.delete",
    "sql.server.delete",
];

const DATA_MUTATION: &[&str] = &[
    "storage.blob.delete",
    "storage.blob.delete-batch",
    "storage.container.delete",
    "storage.account.delete",
    "backup.vault.delete",
    "cosmosdb.collection.delete",
    "cosmosdb.database.delete",
    "sql.db.delete",
    "keyvault.secret.delete",
    "keyvault.key.delete",
    "keyvault.delete",
];

const SERVICE_MUTATION: &[&str] = &[
    "vm.start",
    "vm.stop",
    "vm.restart",
    "vm.deallocate",
    "vm.resize",
    "aks.scale",
    "aks.upgrade",
    "webapp.restart",
    "functionapp.restart",
    "vmss.scale",
    "network.nsg.rule.create",
    "network.nsg.rule.delete",
    "network.nsg.rule.update",
    "sql.db.update",
    "role.assignment.create",
    "ad.sp.create",
];

/// Read-only az verbs.
const READ_COMMANDS: &[&str] = &["list", "show", "get"];
const READ_PREFIXES: &[&str] = &["list-", "show-", "get-"];

/// Classify an Azure `group.command` pair (e.g. `"vm"`, `"delete"`).
/// Fail-closed: commands matched by no table and no read verb are
/// destructive.
pub fn classify_azure(group: &str, command: &str) -> ActionTier {
    let command = command.to_ascii_lowercase();
    let key = format!("{}.{}", group.to_ascii_lowercase(), command);
    if DATA_MUTATION.contains(&key.as_str()) {
        ActionTier::DataMutation
    } else if DESTRUCTIVE.contains(&key.as_str()) {
        ActionTier::DestructiveMutation
    } else if SERVICE_MUTATION.contains(&key.as_str()) {
        ActionTier::ServiceMutation
    } else if READ_COMMANDS.contains(&command.as_str())
        || READ_PREFIXES.iter().any(|p| command.starts_with(p))
    {
        ActionTier::Read
    } else {
        ActionTier::DestructiveMutation
    }
}

pub struct AzureCliTool;

impl AzureCliTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AzureCliTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for AzureCliTool {
    fn name(&self) -> &'static str {
        "az.cli"
    }

    fn description(&self) -> &'static str {
        "Execute Azure CLI commands. Read-only by default; mutations require \
         appropriate autonomy. Credentials are injected automatically."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "group": {"type": "string", "description": "command group (vm, aks, storage.blob, ...)"},
                "command": {"type": "string", "description": "command (list, show, delete, ...)"},
                "args": {"type": "string", "description": "additional arguments"}
            },
            "required": ["group", "command"]
        })
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability {
            domain: "azure",
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
        let group = str_arg(args, "group").to_ascii_lowercase();
        let command = str_arg(args, "command").to_ascii_lowercase();
        let tier = classify_azure(&group, &command);
        Classification::allowed(tier, format!("azure.{group}.{command}"))
            .with_target(format!("{group} {command}"))
    }

    async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        args: &serde_json::Value,
    ) -> RuntimeResult<String> {
        let group = str_arg(args, "group");
        let command = str_arg(args, "command");
        if group.is_empty() || command.is_empty() {
            return Err(RuntimeError::tool("az.cli", "group and command are required"));
        }

        // `storage.blob` expands to `az storage blob <command>`.
        let mut cmd_args: Vec<&str> = group.split('.').collect();
        cmd_args.push(command);
        cmd_args.push("--output");
        cmd_args.push("json");
        let extra = str_arg(args, "args");
        cmd_args.extend(extra.split_whitespace());

        run_command(ctx, "az", &cmd_args).await
    }
}
