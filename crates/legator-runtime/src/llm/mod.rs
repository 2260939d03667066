//! The LLM driver seam.
//!
//! The control plane treats the model as a stream of proposed tool calls
//! ending in a final report. Drivers translate that contract to a concrete
//! provider API; the scripted driver replays canned turns for tests.

pub mod anthropic;
pub mod scripted;

use crate::error::RuntimeResult;
use async_trait::async_trait;
use legator_types::agent::ModelTier;
use legator_types::run::RunFinding;
use serde::{Deserialize, Serialize};

/// A tool the model may call, in provider-neutral form.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments.
    pub parameters: serde_json::Value,
}

/// A tool call the model proposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedToolCall {
    pub tool: String,
    pub args: serde_json::Value,
}

/// The model's closing report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalReport {
    pub report: String,
    #[serde(default)]
    pub findings: Vec<RunFinding>,
}

/// What the model did with its turn.
#[derive(Debug, Clone)]
pub enum AgentTurn {
    Action(ProposedToolCall),
    Final(FinalReport),
}

/// Token accounting for one turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One completed step in the reasoning loop, replayed to the model as
/// context on the next turn. The observation is what the tool (or the
/// guardrail engine) answered.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub call: ProposedToolCall,
    pub observation: String,
}

/// Everything a driver needs to produce the next turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub system: String,
    pub task: String,
    pub tools: Vec<ToolDescriptor>,
    pub transcript: Vec<Exchange>,
    pub tier: ModelTier,
    /// Remaining output-token allowance for this run.
    pub max_tokens: u64,
}

/// A turn plus its token accounting.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn: AgentTurn,
    pub usage: TokenUsage,
}

/// A provider of agent turns.
#[async_trait]
pub trait LlmDriver: Send + Sync {
    async fn next_turn(&self, req: &TurnRequest) -> RuntimeResult<TurnOutcome>;
}

/// Name of the pseudo-tool the model calls to end the run with a report.
/// The driver intercepts it; it never reaches the tool registry.
pub const SUBMIT_REPORT_TOOL: &str = "submit_report";

/// Descriptor for the report pseudo-tool, appended to every tool list.
pub fn submit_report_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: SUBMIT_REPORT_TOOL.to_string(),
        description: "Finish the run with a final report and optional structured findings."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "report": {
                    "type": "string",
                    "description": "Full report text for the operator."
                },
                "findings": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "severity": {"type": "string", "enum": ["critical", "warning", "info"]},
                            "resource": {"type": "string"},
                            "message": {"type": "string"}
                        },
                        "required": ["severity", "message"]
                    }
                }
            },
            "required": ["report"]
        }),
    }
}
