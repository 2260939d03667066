//! Runtime services for Legator agents: the LLM driver seam, the guardrailed
//! tool registry, the Vault client, per-run credential lifecycle, and
//! pre-run connectivity checks.

pub mod connectivity;
pub mod credentials;
pub mod error;
pub mod llm;
pub mod tools;
pub mod vault;

pub use error::{RuntimeError, RuntimeResult};
