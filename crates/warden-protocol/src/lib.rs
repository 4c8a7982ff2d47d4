//! # warden-protocol: shared contract for the Warden agent-security core
//!
//! Defines the captured event model, the ten-category violation taxonomy,
//! aggregate scores, configuration and the base-judge port. It carries no
//! runtime machinery so every other crate can depend on it freely.
//!
//! ## Module Overview
//!
//! - [`ids`]: Typed ID wrappers (EventId, SessionId, EvaluationId)
//! - [`event`]: AgentEvent envelope + EventKind (tool call, memory access, action, speech, divergence)
//! - [`violation`]: ViolationCategory, ViolationResult
//! - [`score`]: JudgeVerdict, AggregateScore
//! - [`config`]: InstrumentationConfig, RiskWeights
//! - [`lexicon`]: secret/system key lexicons and redaction markers
//! - [`text`]: bounded-string helpers
//! - [`ports`]: BaseJudge boundary
//! - [`error`]: WardenError, WardenResult

pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod lexicon;
pub mod ports;
pub mod score;
pub mod text;
pub mod violation;

pub use config::{InstrumentationConfig, RiskWeights};
pub use error::{WardenError, WardenResult};
pub use event::{
    ActionRecord, AgentEvent, DivergenceEvent, DivergenceSeverity, EventKind, MemoryAccessEvent,
    MemoryOperation, SpeechRecord, ToolArguments, ToolCallEvent,
};
pub use ids::{EvaluationId, EventId, SessionId};
pub use lexicon::{MASKED_PLACEHOLDER, REDACTED_MARKER};
pub use ports::{BaseJudge, JudgeContext, JudgeError};
pub use score::{AggregateScore, AggregateScoreParts, JudgeVerdict};
pub use violation::{ViolationCategory, ViolationResult};
