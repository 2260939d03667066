//! Error type for resource validation and parsing.

use thiserror::Error;

pub type TypesResult<T> = Result<T, TypesError>;

/// Validation and parsing failures for resource specs.
///
/// These surface on agent status rather than aborting the process: a
/// malformed schedule means the agent never becomes due, not that the
/// scheduler dies.
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("invalid timezone {0:?}")]
    InvalidTimezone(String),

    #[error("invalid duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
