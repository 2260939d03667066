//! dns.query tool — name resolution. Always a read.

use crate::error::{RuntimeError, RuntimeResult};
use crate::tools::{str_arg, Classification, Tool, ToolCapability, ToolContext};
use async_trait::async_trait;
use legator_types::run::ActionTier;
use std::time::Duration;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DnsTool;

impl DnsTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DnsTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for DnsTool {
    fn name(&self) -> &'static str {
        "dns.query"
    }

    fn description(&self) -> &'static str {
        "Resolve a hostname to its addresses."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "hostname": {"type": "string"}
            },
            "required": ["hostname"]
        })
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability {
            domain: "dns",
            tiers: &[ActionTier::Read],
            requires_credentials: false,
        }
    }

    fn classify(&self, args: &serde_json::Value) -> Classification {
        let hostname = str_arg(args, "hostname");
        Classification::allowed(ActionTier::Read, "dns.query").with_target(hostname.to_string())
    }

    async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        args: &serde_json::Value,
    ) -> RuntimeResult<String> {
        let hostname = str_arg(args, "hostname");
        if hostname.is_empty() {
            return Err(RuntimeError::tool("dns.query", "hostname is required"));
        }

        // lookup_host needs a port; 0 is discarded from the output.
        let query = format!("{hostname}:0");
        let addrs = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(RuntimeError::Cancelled),
            res = tokio::time::timeout(LOOKUP_TIMEOUT, tokio::net::lookup_host(query)) => match res {
                Err(_) => return Err(RuntimeError::tool_transient("dns.query", "lookup timed out")),
                Ok(Err(e)) => {
                    return Err(RuntimeError::tool_transient("dns.query", format!("lookup: {e}")))
                }
                Ok(Ok(addrs)) => addrs,
            },
        };

        let ips: Vec<String> = addrs.map(|a| a.ip().to_string()).collect();
        if ips.is_empty() {
            return Ok(format!("{hostname}: no addresses"));
        }
        Ok(format!("{hostname}: {}", ips.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_read() {
        let tool = DnsTool::new();
        let c = tool.classify(&serde_json::json!({"hostname": "db.internal"}));
        assert_eq!(c.tier, ActionTier::Read);
        assert_eq!(c.action, "dns.query");
        assert!(!c.blocked);
    }
}
