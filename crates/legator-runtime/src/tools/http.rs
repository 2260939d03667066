//! http.request tool — guardrailed HTTP calls, classified by method.

use crate::error::{RuntimeError, RuntimeResult};
use crate::tools::{str_arg, truncate_output, Classification, Tool, ToolCapability, ToolContext};
use async_trait::async_trait;
use legator_types::run::ActionTier;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_OUTPUT: usize = 8192;

/// Classify an HTTP method. Fail-closed on anything unrecognized.
pub fn classify_method(method: &str) -> ActionTier {
    match method.to_ascii_uppercase().as_str() {
        "GET" | "HEAD" | "OPTIONS" => ActionTier::Read,
        "POST" | "PUT" | "PATCH" => ActionTier::ServiceMutation,
        "DELETE" => ActionTier::DestructiveMutation,
        _ => ActionTier::DestructiveMutation,
    }
}

pub struct HttpTool {
    client: reqwest::Client,
}

impl HttpTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &'static str {
        "http.request"
    }

    fn description(&self) -> &'static str {
        "Issue an HTTP request against a declared endpoint. GET/HEAD are \
         reads; mutating methods require appropriate autonomy."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "method": {"type": "string", "description": "HTTP method"},
                "url": {"type": "string"},
                "body": {"type": "string", "description": "request body, optional"},
                "content_type": {"type": "string"}
            },
            "required": ["method", "url"]
        })
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability {
            domain: "http",
            tiers: &[
                ActionTier::Read,
                ActionTier::ServiceMutation,
                ActionTier::DestructiveMutation,
            ],
            requires_credentials: false,
        }
    }

    fn classify(&self, args: &serde_json::Value) -> Classification {
        let method = str_arg(args, "method").to_ascii_lowercase();
        let url = str_arg(args, "url");
        Classification::allowed(classify_method(&method), format!("http.{method}"))
            .with_target(url.to_string())
    }

    async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        args: &serde_json::Value,
    ) -> RuntimeResult<String> {
        let method = str_arg(args, "method").to_ascii_uppercase();
        let url = str_arg(args, "url");
        if method.is_empty() || url.is_empty() {
            return Err(RuntimeError::tool("http.request", "method and url are required"));
        }

        let m: reqwest::Method = method
            .parse()
            .map_err(|_| RuntimeError::tool("http.request", format!("bad method {method:?}")))?;
        let mut req = self.client.request(m, url);
        let body = str_arg(args, "body");
        if !body.is_empty() {
            req = req.body(body.to_string());
            let ct = str_arg(args, "content_type");
            if !ct.is_empty() {
                req = req.header("Content-Type", ct.to_string());
            }
        }

        let resp = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(RuntimeError::Cancelled),
            r = req.send() => r.map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    RuntimeError::tool_transient("http.request", format!("{e}"))
                } else {
                    RuntimeError::tool("http.request", format!("{e}"))
                }
            })?,
        };

        let status = resp.status();
        if status.is_server_error() {
            return Err(RuntimeError::tool_transient(
                "http.request",
                format!("server returned {status}"),
            ));
        }
        let text = resp.text().await.unwrap_or_default();
        Ok(format!("HTTP {status}\n{}", truncate_output(text, MAX_OUTPUT)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_table() {
        assert_eq!(classify_method("GET"), ActionTier::Read);
        assert_eq!(classify_method("head"), ActionTier::Read);
        assert_eq!(classify_method("POST"), ActionTier::ServiceMutation);
        assert_eq!(classify_method("PUT"), ActionTier::ServiceMutation);
        assert_eq!(classify_method("DELETE"), ActionTier::DestructiveMutation);
        assert_eq!(classify_method("BREW"), ActionTier::DestructiveMutation);
    }

    #[test]
    fn action_key_is_lowercased_method() {
        let tool = HttpTool::new();
        let c = tool.classify(&serde_json::json!({"method": "POST", "url": "https://api.internal/x"}));
        assert_eq!(c.action, "http.post");
        assert_eq!(c.target, "https://api.internal/x");
    }
}
