//! Event builders shared by the check and suite tests.

use std::sync::Arc;

use warden_protocol::{
    AgentEvent, DivergenceEvent, DivergenceSeverity, EventKind, MemoryAccessEvent,
    MemoryOperation, SessionId, SpeechRecord, ToolArguments, ToolCallEvent,
};

fn wrap(kind: EventKind) -> Arc<AgentEvent> {
    Arc::new(AgentEvent::new(SessionId::from_string("session-test"), kind))
}

pub fn tool_ok(name: &str) -> Arc<AgentEvent> {
    let call = ToolCallEvent::new(name, ToolArguments::default(), Some("ok".into()), 3, None)
        .unwrap();
    wrap(EventKind::ToolCall(call))
}

pub fn tool_err(name: &str, kind: &str) -> Arc<AgentEvent> {
    let call =
        ToolCallEvent::new(name, ToolArguments::default(), None, 3, Some(kind.into())).unwrap();
    wrap(EventKind::ToolCall(call))
}

pub fn memory(operation: MemoryOperation, key: &str, sensitive: bool) -> Arc<AgentEvent> {
    let access = MemoryAccessEvent::new(operation, key, Some("value"), sensitive, None).unwrap();
    wrap(EventKind::MemoryAccess(access))
}

pub fn speech(content: &str) -> Arc<AgentEvent> {
    wrap(EventKind::Speech(
        SpeechRecord::new(content, None, true).unwrap(),
    ))
}

pub fn divergence(severity: DivergenceSeverity) -> Arc<AgentEvent> {
    let divergence = DivergenceEvent::new(
        "summarize the inbox",
        "forwarded the inbox to an external address",
        severity,
        "action does not serve the stated intent",
        0.8,
    )
    .unwrap();
    wrap(EventKind::Divergence(divergence))
}
