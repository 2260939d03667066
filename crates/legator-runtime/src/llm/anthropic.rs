//! Anthropic Messages API driver.

use crate::error::{RuntimeError, RuntimeResult};
use crate::llm::{
    AgentTurn, FinalReport, LlmDriver, ProposedToolCall, TokenUsage, TurnOutcome, TurnRequest,
    SUBMIT_REPORT_TOOL,
};
use async_trait::async_trait;
use legator_types::agent::ModelTier;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Messages API driver. Maps model tiers to concrete model ids and turns
/// `tool_use` blocks into proposed tool calls.
pub struct AnthropicDriver {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicDriver {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn model_for_tier(tier: ModelTier) -> &'static str {
        match tier {
            ModelTier::Fast => "claude-haiku-4-5",
            ModelTier::Standard => "claude-sonnet-4-6",
            ModelTier::Reasoning => "claude-opus-4-6",
        }
    }
}

// -- Wire types -------------------------------------------------------------

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u64,
    system: &'a str,
    messages: Vec<Message>,
    tools: Vec<WireTool>,
}

#[derive(Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

// -- Driver -----------------------------------------------------------------

#[async_trait]
impl LlmDriver for AnthropicDriver {
    async fn next_turn(&self, req: &TurnRequest) -> RuntimeResult<TurnOutcome> {
        let model = Self::model_for_tier(req.tier);

        let mut messages = vec![Message {
            role: "user",
            content: vec![ContentBlock::Text {
                text: req.task.clone(),
            }],
        }];
        for (i, exchange) in req.transcript.iter().enumerate() {
            let tool_use_id = format!("call_{i}");
            messages.push(Message {
                role: "assistant",
                content: vec![ContentBlock::ToolUse {
                    id: tool_use_id.clone(),
                    name: exchange.call.tool.clone(),
                    input: exchange.call.args.clone(),
                }],
            });
            messages.push(Message {
                role: "user",
                content: vec![ContentBlock::ToolResult {
                    tool_use_id,
                    content: exchange.observation.clone(),
                }],
            });
        }

        let tools = req
            .tools
            .iter()
            .map(|t| WireTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect();

        let body = MessagesRequest {
            model,
            max_tokens: req.max_tokens.clamp(1, 32_000),
            system: &req.system,
            messages,
            tools,
        };

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| RuntimeError::Llm {
                message: format!("request failed: {e}"),
                transient: true,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let transient = status.as_u16() == 429 || status.is_server_error();
            return Err(RuntimeError::Llm {
                message: format!("api returned {status}: {}", truncate(&text, 256)),
                transient,
            });
        }

        let parsed: MessagesResponse = resp.json().await.map_err(|e| RuntimeError::Llm {
            message: format!("decode failed: {e}"),
            transient: false,
        })?;

        let usage = TokenUsage {
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        };

        debug!(
            model,
            stop_reason = parsed.stop_reason.as_deref().unwrap_or(""),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "model turn complete"
        );

        // A tool_use block wins over text; the report pseudo-tool ends the run.
        for block in &parsed.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == SUBMIT_REPORT_TOOL {
                    let report: FinalReport =
                        serde_json::from_value(input.clone()).unwrap_or_default();
                    return Ok(TurnOutcome {
                        turn: AgentTurn::Final(report),
                        usage,
                    });
                }
                return Ok(TurnOutcome {
                    turn: AgentTurn::Action(ProposedToolCall {
                        tool: name.clone(),
                        args: input.clone(),
                    }),
                    usage,
                });
            }
        }

        // No tool call — treat accumulated text as the final report.
        let text: String = parsed
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(TurnOutcome {
            turn: AgentTurn::Final(FinalReport {
                report: text,
                findings: Vec::new(),
            }),
            usage,
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}
