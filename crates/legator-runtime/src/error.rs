//! Runtime error type shared by drivers, tools, and credential plumbing.

use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("llm error: {message}")]
    Llm { message: String, transient: bool },

    #[error("tool {tool} failed: {message}")]
    Tool {
        tool: String,
        message: String,
        transient: bool,
    },

    #[error("vault: {0}")]
    Vault(String),

    #[error("credential {handle}: {message}")]
    Credential { handle: String, message: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl RuntimeError {
    /// Transient failures (timeouts, 5xx, DNS) are retried by the runner up
    /// to the agent's retry budget; everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            RuntimeError::Llm { transient, .. } => *transient,
            RuntimeError::Tool { transient, .. } => *transient,
            _ => false,
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        RuntimeError::Tool {
            tool: tool.into(),
            message: message.into(),
            transient: false,
        }
    }

    pub fn tool_transient(tool: impl Into<String>, message: impl Into<String>) -> Self {
        RuntimeError::Tool {
            tool: tool.into(),
            message: message.into(),
            transient: true,
        }
    }
}
