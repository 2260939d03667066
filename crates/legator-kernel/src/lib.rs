//! The scheduling and execution core of the Legator control plane.
//!
//! Four interlocking state machines live here: the schedule evaluator, the
//! run lifecycle, the action gate, and the approval protocol — composed
//! under concurrency, partial failure, and a human in the loop.

pub mod approval;
pub mod concurrency;
pub mod debounce;
pub mod error;
pub mod escalation;
pub mod guardrails;
pub mod kernel;
pub mod lifecycle;
pub mod multicluster;
pub mod pattern;
pub mod protection;
pub mod retention;
pub mod runner;
pub mod schedule;
pub mod triggers;

pub use error::{KernelError, KernelResult};
pub use kernel::{Kernel, KernelConfig};
