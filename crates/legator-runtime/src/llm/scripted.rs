//! Scripted driver — replays a fixed sequence of turns.
//!
//! Used by runner and kernel tests to exercise the full gate pipeline
//! without a live provider.

use crate::error::{RuntimeError, RuntimeResult};
use crate::llm::{AgentTurn, LlmDriver, TokenUsage, TurnOutcome, TurnRequest};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays queued turns in order. Each turn charges a fixed token cost so
/// usage accounting is observable in tests.
pub struct ScriptedDriver {
    turns: Mutex<VecDeque<AgentTurn>>,
    per_turn_usage: TokenUsage,
}

impl ScriptedDriver {
    pub fn new(turns: Vec<AgentTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            per_turn_usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
        }
    }

    /// Remaining scripted turns.
    pub fn remaining(&self) -> usize {
        self.turns.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LlmDriver for ScriptedDriver {
    async fn next_turn(&self, _req: &TurnRequest) -> RuntimeResult<TurnOutcome> {
        let turn = self
            .turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| RuntimeError::Llm {
                message: "script exhausted".to_string(),
                transient: false,
            })?;
        Ok(TurnOutcome {
            turn,
            usage: self.per_turn_usage,
        })
    }
}

/// A driver that always fails, for exercising failure paths.
pub struct FailingDriver {
    pub transient: bool,
}

#[async_trait]
impl LlmDriver for FailingDriver {
    async fn next_turn(&self, _req: &TurnRequest) -> RuntimeResult<TurnOutcome> {
        Err(RuntimeError::Llm {
            message: "provider unavailable".to_string(),
            transient: self.transient,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FinalReport, ProposedToolCall};
    use legator_types::agent::ModelTier;

    fn request() -> TurnRequest {
        TurnRequest {
            system: String::new(),
            task: "inspect".into(),
            tools: vec![],
            transcript: vec![],
            tier: ModelTier::Standard,
            max_tokens: 1000,
        }
    }

    #[tokio::test]
    async fn replays_in_order_then_errors() {
        let driver = ScriptedDriver::new(vec![
            AgentTurn::Action(ProposedToolCall {
                tool: "kubectl".into(),
                args: serde_json::json!({"verb": "get", "resource": "pods"}),
            }),
            AgentTurn::Final(FinalReport {
                report: "all healthy".into(),
                findings: vec![],
            }),
        ]);

        let req = request();
        assert!(matches!(
            driver.next_turn(&req).await.unwrap().turn,
            AgentTurn::Action(_)
        ));
        assert!(matches!(
            driver.next_turn(&req).await.unwrap().turn,
            AgentTurn::Final(_)
        ));
        assert!(driver.next_turn(&req).await.is_err());
    }
}
