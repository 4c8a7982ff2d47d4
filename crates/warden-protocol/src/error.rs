//! Error types for the Warden core.

use thiserror::Error;

/// Errors surfaced synchronously to callers of the instrumentation core.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("invalid memory key: {0}")]
    InvalidMemoryKey(String),
    #[error("invalid score: {0}")]
    InvalidScore(String),
    #[error("instrumentation compromised after {failures} recording failures")]
    InstrumentationCompromised { failures: u32 },
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl WardenError {
    /// Static variant name. Logs carry this instead of the message so that
    /// payload fragments never reach a log sink.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "InvalidConfig",
            Self::InvalidEvent(_) => "InvalidEvent",
            Self::InvalidMemoryKey(_) => "InvalidMemoryKey",
            Self::InvalidScore(_) => "InvalidScore",
            Self::InstrumentationCompromised { .. } => "InstrumentationCompromised",
            Self::Serialization(_) => "Serialization",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InstrumentationCompromised { .. })
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Convenience result type for core operations.
pub type WardenResult<T> = Result<T, WardenError>;
