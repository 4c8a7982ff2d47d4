//! Captured agent events.
//!
//! Every event shares one envelope (id, session, UTC timestamp, schema
//! version) and carries exactly one [`EventKind`] payload. The payload is an
//! internally tagged union with an explicit `"type"` discriminator, so checks
//! pattern-match on the kind instead of inspecting runtime types.
//!
//! Payloads with invariants keep their fields private and are only built
//! through validating constructors. Deserialization goes through a wire struct
//! and the same constructor, so invalid wire data is rejected the same way.

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{WardenError, WardenResult};
use crate::ids::{EventId, SessionId};
use crate::lexicon::REDACTED_MARKER;
use crate::text::{bounded_preview, require_bounded};

pub const EVENT_SCHEMA_VERSION: u8 = 1;
pub const MAX_TOOL_NAME_CHARS: usize = 64;
pub const MAX_ARGUMENT_CHARS: usize = 256;
pub const MAX_RESULT_CHARS: usize = 1_000;
pub const MAX_MEMORY_KEY_CHARS: usize = 256;
pub const MAX_VALUE_PREVIEW_CHARS: usize = 200;
pub const MAX_SPEECH_CHARS: usize = 10_000;

fn default_schema_version() -> u8 {
    EVENT_SCHEMA_VERSION
}

/// The shared envelope around every captured event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    event_id: EventId,
    session_id: SessionId,
    /// Always timezone-aware; RFC 3339 strings without an offset fail to parse.
    timestamp: DateTime<Utc>,
    #[serde(default = "default_schema_version")]
    schema_version: u8,
    kind: EventKind,
}

impl AgentEvent {
    /// Create a new event stamped with the current time.
    pub fn new(session_id: SessionId, kind: EventKind) -> Self {
        Self::at(session_id, Utc::now(), kind)
    }

    pub fn at(session_id: SessionId, timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self {
            event_id: EventId::default(),
            session_id,
            timestamp,
            schema_version: EVENT_SCHEMA_VERSION,
            kind,
        }
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn schema_version(&self) -> u8 {
        self.schema_version
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }
}

/// Discriminated union of all captured event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ToolCall(ToolCallEvent),
    MemoryAccess(MemoryAccessEvent),
    Action(ActionRecord),
    Speech(SpeechRecord),
    Divergence(DivergenceEvent),
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ToolCall(_) => "tool_call",
            Self::MemoryAccess(_) => "memory_access",
            Self::Action(_) => "action",
            Self::Speech(_) => "speech",
            Self::Divergence(_) => "divergence",
        }
    }
}

// ─── Tool calls ────────────────────────────────────────────────────

/// String renderings of a call's arguments. Raw argument objects never
/// enter an event; every entry is a bounded preview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ToolArgumentsWire")]
pub struct ToolArguments {
    positional: Vec<String>,
    keyword: IndexMap<String, String>,
}

#[derive(Deserialize)]
struct ToolArgumentsWire {
    #[serde(default)]
    positional: Vec<String>,
    #[serde(default)]
    keyword: IndexMap<String, String>,
}

impl From<ToolArgumentsWire> for ToolArguments {
    fn from(wire: ToolArgumentsWire) -> Self {
        Self::new(wire.positional, wire.keyword)
    }
}

impl ToolArguments {
    pub fn new(positional: Vec<String>, keyword: IndexMap<String, String>) -> Self {
        Self {
            positional: positional
                .iter()
                .map(|value| bounded_preview(value, MAX_ARGUMENT_CHARS))
                .collect(),
            keyword: keyword
                .iter()
                .map(|(name, value)| (name.clone(), bounded_preview(value, MAX_ARGUMENT_CHARS)))
                .collect(),
        }
    }

    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    pub fn keyword(&self) -> &IndexMap<String, String> {
        &self.keyword
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

/// One tool invocation. `success == exception_kind.is_none()` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ToolCallEventWire")]
pub struct ToolCallEvent {
    tool_name: String,
    arguments: ToolArguments,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<String>,
    duration_ms: u64,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception_kind: Option<String>,
}

#[derive(Deserialize)]
struct ToolCallEventWire {
    tool_name: String,
    #[serde(default)]
    arguments: ToolArguments,
    #[serde(default)]
    result: Option<String>,
    duration_ms: u64,
    success: bool,
    #[serde(default)]
    exception_kind: Option<String>,
}

impl TryFrom<ToolCallEventWire> for ToolCallEvent {
    type Error = WardenError;

    fn try_from(wire: ToolCallEventWire) -> WardenResult<Self> {
        if wire.success == wire.exception_kind.is_some() {
            return Err(WardenError::InvalidEvent(
                "tool call success must be false exactly when exception_kind is present".into(),
            ));
        }
        Self::new(
            wire.tool_name,
            wire.arguments,
            wire.result,
            wire.duration_ms,
            wire.exception_kind,
        )
    }
}

impl ToolCallEvent {
    /// Build a tool-call payload. `exception_kind = None` means the call
    /// succeeded; `Some(kind)` means it failed with that kind.
    pub fn new(
        tool_name: impl Into<String>,
        arguments: ToolArguments,
        result: Option<String>,
        duration_ms: u64,
        exception_kind: Option<String>,
    ) -> WardenResult<Self> {
        let tool_name = tool_name.into();
        require_bounded("tool_name", &tool_name, MAX_TOOL_NAME_CHARS)?;
        if let Some(kind) = &exception_kind
            && kind.trim().is_empty()
        {
            return Err(WardenError::InvalidEvent(
                "exception_kind must not be blank".into(),
            ));
        }
        Ok(Self {
            tool_name,
            arguments,
            result: result.map(|value| bounded_preview(&value, MAX_RESULT_CHARS)),
            duration_ms,
            success: exception_kind.is_none(),
            exception_kind,
        })
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn arguments(&self) -> &ToolArguments {
        &self.arguments
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn exception_kind(&self) -> Option<&str> {
        self.exception_kind.as_deref()
    }
}

// ─── Memory access ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOperation {
    Read,
    Write,
    Delete,
}

impl MemoryOperation {
    pub fn is_mutation(self) -> bool {
        matches!(self, Self::Write | Self::Delete)
    }
}

impl fmt::Display for MemoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One memory read/write/delete.
///
/// When `sensitive_detected` is set the value preview is always the fixed
/// redaction marker, whatever the caller passed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MemoryAccessEventWire")]
pub struct MemoryAccessEvent {
    operation: MemoryOperation,
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value_preview: Option<String>,
    sensitive_detected: bool,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception_kind: Option<String>,
}

#[derive(Deserialize)]
struct MemoryAccessEventWire {
    operation: MemoryOperation,
    key: String,
    #[serde(default)]
    value_preview: Option<String>,
    sensitive_detected: bool,
    success: bool,
    #[serde(default)]
    exception_kind: Option<String>,
}

impl TryFrom<MemoryAccessEventWire> for MemoryAccessEvent {
    type Error = WardenError;

    fn try_from(wire: MemoryAccessEventWire) -> WardenResult<Self> {
        if wire.success == wire.exception_kind.is_some() {
            return Err(WardenError::InvalidEvent(
                "memory access success must be false exactly when exception_kind is present"
                    .into(),
            ));
        }
        Self::new(
            wire.operation,
            wire.key,
            wire.value_preview.as_deref(),
            wire.sensitive_detected,
            wire.exception_kind,
        )
    }
}

impl MemoryAccessEvent {
    pub fn new(
        operation: MemoryOperation,
        key: impl Into<String>,
        value_preview: Option<&str>,
        sensitive_detected: bool,
        exception_kind: Option<String>,
    ) -> WardenResult<Self> {
        let key = key.into();
        require_bounded("memory key", &key, MAX_MEMORY_KEY_CHARS)?;
        if let Some(kind) = &exception_kind
            && kind.trim().is_empty()
        {
            return Err(WardenError::InvalidEvent(
                "exception_kind must not be blank".into(),
            ));
        }
        let value_preview = if sensitive_detected {
            Some(REDACTED_MARKER.to_owned())
        } else {
            value_preview.map(|value| bounded_preview(value, MAX_VALUE_PREVIEW_CHARS))
        };
        Ok(Self {
            operation,
            key,
            value_preview,
            sensitive_detected,
            success: exception_kind.is_none(),
            exception_kind,
        })
    }

    pub fn operation(&self) -> MemoryOperation {
        self.operation
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value_preview(&self) -> Option<&str> {
        self.value_preview.as_deref()
    }

    pub fn sensitive_detected(&self) -> bool {
        self.sensitive_detected
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn exception_kind(&self) -> Option<&str> {
        self.exception_kind.as_deref()
    }
}

// ─── Actions and speech ────────────────────────────────────────────

/// An action the agent took or is inferred to have taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_type: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub related_tool_calls: IndexSet<EventId>,
}

impl ActionRecord {
    pub fn new(action_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            description: description.into(),
            target: None,
            related_tool_calls: IndexSet::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_related_call(mut self, event_id: EventId) -> Self {
        self.related_tool_calls.insert(event_id);
        self
    }
}

/// Something the agent said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SpeechRecordWire")]
pub struct SpeechRecord {
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    intent: Option<String>,
    is_response_to_user: bool,
}

#[derive(Deserialize)]
struct SpeechRecordWire {
    content: String,
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    is_response_to_user: bool,
}

impl TryFrom<SpeechRecordWire> for SpeechRecord {
    type Error = WardenError;

    fn try_from(wire: SpeechRecordWire) -> WardenResult<Self> {
        Self::new(wire.content, wire.intent, wire.is_response_to_user)
    }
}

impl SpeechRecord {
    pub fn new(
        content: impl Into<String>,
        intent: Option<String>,
        is_response_to_user: bool,
    ) -> WardenResult<Self> {
        let content = content.into();
        let len = content.chars().count();
        if len > MAX_SPEECH_CHARS {
            return Err(WardenError::InvalidEvent(format!(
                "speech content is {len} chars, limit is {MAX_SPEECH_CHARS}"
            )));
        }
        Ok(Self {
            content,
            intent,
            is_response_to_user,
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn intent(&self) -> Option<&str> {
        self.intent.as_deref()
    }

    pub fn is_response_to_user(&self) -> bool {
        self.is_response_to_user
    }
}

// ─── Divergence ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DivergenceSeverity {
    Low,
    Medium,
    High,
}

/// A mismatch between what the agent said it would do and what it did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DivergenceEventWire")]
pub struct DivergenceEvent {
    stated_intent: String,
    actual_action: String,
    severity: DivergenceSeverity,
    explanation: String,
    confidence: f64,
}

#[derive(Deserialize)]
struct DivergenceEventWire {
    stated_intent: String,
    actual_action: String,
    severity: DivergenceSeverity,
    #[serde(default)]
    explanation: String,
    confidence: f64,
}

impl TryFrom<DivergenceEventWire> for DivergenceEvent {
    type Error = WardenError;

    fn try_from(wire: DivergenceEventWire) -> WardenResult<Self> {
        Self::new(
            wire.stated_intent,
            wire.actual_action,
            wire.severity,
            wire.explanation,
            wire.confidence,
        )
    }
}

impl DivergenceEvent {
    pub fn new(
        stated_intent: impl Into<String>,
        actual_action: impl Into<String>,
        severity: DivergenceSeverity,
        explanation: impl Into<String>,
        confidence: f64,
    ) -> WardenResult<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(WardenError::InvalidEvent(format!(
                "divergence confidence {confidence} outside [0, 1]"
            )));
        }
        Ok(Self {
            stated_intent: stated_intent.into(),
            actual_action: actual_action.into(),
            severity,
            explanation: explanation.into(),
            confidence,
        })
    }

    pub fn stated_intent(&self) -> &str {
        &self.stated_intent
    }

    pub fn actual_action(&self) -> &str {
        &self.actual_action
    }

    pub fn severity(&self) -> DivergenceSeverity {
        self.severity
    }

    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}
