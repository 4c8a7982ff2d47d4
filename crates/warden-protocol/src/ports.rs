//! Boundary ports to external collaborators.
//!
//! The base judge is the only external capability the core consumes. It is
//! injected as a trait object (`async-trait` for async dyn-dispatch) and may
//! fail; callers convert failures into [`JudgeVerdict::fallback`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::SessionId;
use crate::score::JudgeVerdict;

/// Conversation context handed to the base judge for one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JudgeContext {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_input: Option<String>,
    pub agent_output: String,
    /// Recent agent utterances, oldest first.
    #[serde(default)]
    pub transcript: Vec<String>,
}

impl JudgeContext {
    pub fn new(session_id: SessionId, agent_output: impl Into<String>) -> Self {
        Self {
            session_id,
            user_input: None,
            agent_output: agent_output.into(),
            transcript: Vec::new(),
        }
    }

    pub fn with_user_input(mut self, input: impl Into<String>) -> Self {
        self.user_input = Some(input.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("judge request timed out")]
    Timeout,
    #[error("judge returned a malformed verdict: {0}")]
    Malformed(String),
    #[error("judge backend failed: {0}")]
    Backend(String),
}

impl JudgeError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "Timeout",
            Self::Malformed(_) => "Malformed",
            Self::Backend(_) => "Backend",
        }
    }
}

/// LLM-backed qualitative evaluator for a conversation turn.
#[async_trait]
pub trait BaseJudge: Send + Sync {
    /// Score the turn. `secret`, when given, is the value to check for leakage.
    async fn judge(
        &self,
        context: &JudgeContext,
        secret: Option<&str>,
    ) -> Result<JudgeVerdict, JudgeError>;
}
