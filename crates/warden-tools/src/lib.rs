use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use warden_events::EventRecorder;
use warden_protocol::{
    EventKind, MASKED_PLACEHOLDER, ToolArguments, ToolCallEvent, WardenError, WardenResult,
};

const PANIC_KIND: &str = "Panic";

/// Static declaration of a tool: its parameter names in positional order and
/// which of them carry secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub sensitive_args: IndexSet<String>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
            sensitive_args: IndexSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: &[&str]) -> Self {
        self.parameters = parameters.iter().map(|p| (*p).to_owned()).collect();
        self
    }

    pub fn with_sensitive_args(mut self, sensitive: &[&str]) -> Self {
        self.sensitive_args = sensitive.iter().map(|p| (*p).to_owned()).collect();
        self
    }
}

#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn register(&mut self, definition: ToolDefinition) {
        self.tools.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.values()
    }
}

/// Arguments of one call as the tool receives them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    #[serde(default)]
    pub positional: Vec<Value>,
    #[serde(default)]
    pub keyword: IndexMap<String, Value>,
}

impl ToolInvocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }
}

/// Classification of a tool error for the event's `exception_kind`.
pub trait ToolFailure: fmt::Display {
    fn kind(&self) -> Cow<'_, str>;
}

/// General-purpose tool error carrying an explicit kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: String,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new("PermissionDenied", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("ValidationError", message)
    }
}

impl ToolFailure for ToolError {
    fn kind(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.kind)
    }
}

impl ToolFailure for std::io::Error {
    fn kind(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{:?}", std::io::Error::kind(self)))
    }
}

impl ToolFailure for WardenError {
    fn kind(&self) -> Cow<'_, str> {
        Cow::Borrowed(WardenError::kind(self))
    }
}

/// Per-tool call statistics. Tracked for registered tools only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolStats {
    pub calls: u64,
    pub errors: u64,
    pub total_duration_ms: u64,
}

impl ToolStats {
    pub fn average_duration_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.calls as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.errors as f64 / self.calls as f64
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

enum CallOutcome {
    Ok(String),
    Err(String),
    Panicked,
}

/// Wraps tool invocations, emitting exactly one tool-call event per call.
pub struct ToolCallInterceptor {
    recorder: Arc<EventRecorder>,
    registry: RwLock<ToolRegistry>,
    stats: Mutex<HashMap<String, ToolStats>>,
    enabled: bool,
}

impl ToolCallInterceptor {
    pub fn new(recorder: Arc<EventRecorder>) -> Self {
        Self {
            recorder,
            registry: RwLock::new(ToolRegistry::default()),
            stats: Mutex::new(HashMap::new()),
            enabled: true,
        }
    }

    /// An interceptor that calls through without recording.
    pub fn disabled(recorder: Arc<EventRecorder>) -> Self {
        Self {
            enabled: false,
            ..Self::new(recorder)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn register(&self, definition: ToolDefinition) {
        self.stats
            .lock()
            .entry(definition.name.clone())
            .or_default();
        debug!(tool = %definition.name, sensitive = definition.sensitive_args.len(), "tool registered");
        self.registry.write().register(definition);
    }

    pub fn registry(&self) -> ToolRegistry {
        self.registry.read().clone()
    }

    pub fn tool_stats(&self, tool_name: &str) -> Option<ToolStats> {
        self.stats.lock().get(tool_name).copied()
    }

    /// Stats for every registered tool, ordered by name.
    pub fn stats(&self) -> IndexMap<String, ToolStats> {
        let mut all: IndexMap<String, ToolStats> = self
            .stats
            .lock()
            .iter()
            .map(|(name, stats)| (name.clone(), *stats))
            .collect();
        all.sort_keys();
        all
    }

    /// Render `invocation` into event arguments, masking declared sensitive
    /// parameters. If the call cannot be bound to the declared parameters,
    /// every argument is masked.
    pub fn masked_arguments(&self, tool_name: &str, invocation: &ToolInvocation) -> ToolArguments {
        let registry = self.registry.read();
        let Some(definition) = registry.get(tool_name) else {
            return render_plain(invocation);
        };
        if definition.sensitive_args.is_empty() {
            return render_plain(invocation);
        }
        match bind_parameters(definition, invocation) {
            Ok(positional_names) => {
                let positional = invocation
                    .positional
                    .iter()
                    .zip(positional_names)
                    .map(|(value, name)| {
                        if definition.sensitive_args.contains(name) {
                            MASKED_PLACEHOLDER.to_owned()
                        } else {
                            render(value)
                        }
                    })
                    .collect();
                let keyword = invocation
                    .keyword
                    .iter()
                    .map(|(name, value)| {
                        let shown = if definition.sensitive_args.contains(name) {
                            MASKED_PLACEHOLDER.to_owned()
                        } else {
                            render(value)
                        };
                        (name.clone(), shown)
                    })
                    .collect();
                ToolArguments::new(positional, keyword)
            }
            Err(reason) => {
                warn!(tool = tool_name, reason, "argument binding failed, masking all arguments");
                mask_all(invocation)
            }
        }
    }

    /// Invoke a synchronous tool. The outer `Err` is reserved for a
    /// compromised recorder; the inner result is the tool's own outcome.
    /// Once the recorder is compromised `call` is not run at all.
    /// A panic inside `call` is recorded and then resumed.
    #[instrument(skip_all, fields(tool = tool_name))]
    pub fn intercept<R, E, F>(
        &self,
        tool_name: &str,
        invocation: &ToolInvocation,
        call: F,
    ) -> WardenResult<Result<R, E>>
    where
        F: FnOnce(&ToolInvocation) -> Result<R, E>,
        R: fmt::Debug,
        E: ToolFailure,
    {
        if !self.enabled {
            return Ok(call(invocation));
        }
        self.recorder.ensure_active()?;
        let arguments = self.masked_arguments(tool_name, invocation);
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| call(invocation)));
        let duration_ms = elapsed_ms(started);

        match result {
            Ok(result) => {
                let outcome = describe(&result);
                self.finish(tool_name, arguments, duration_ms, outcome)?;
                Ok(result)
            }
            Err(payload) => {
                if let Err(err) = self.finish(tool_name, arguments, duration_ms, CallOutcome::Panicked)
                {
                    warn!(error_kind = err.kind(), "recording failed while tool panicked");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    /// Async counterpart of [`Self::intercept`]. Duration is measured across
    /// the whole future; nothing here cancels or times out the tool.
    #[instrument(skip_all, fields(tool = tool_name))]
    pub async fn intercept_async<R, E, F, Fut>(
        &self,
        tool_name: &str,
        invocation: ToolInvocation,
        call: F,
    ) -> WardenResult<Result<R, E>>
    where
        F: FnOnce(ToolInvocation) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: fmt::Debug,
        E: ToolFailure,
    {
        if !self.enabled {
            return Ok(call(invocation).await);
        }
        self.recorder.ensure_active()?;
        let arguments = self.masked_arguments(tool_name, &invocation);
        let started = Instant::now();
        let result = AssertUnwindSafe(call(invocation)).catch_unwind().await;
        let duration_ms = elapsed_ms(started);

        match result {
            Ok(result) => {
                let outcome = describe(&result);
                self.finish(tool_name, arguments, duration_ms, outcome)?;
                Ok(result)
            }
            Err(payload) => {
                if let Err(err) = self.finish(tool_name, arguments, duration_ms, CallOutcome::Panicked)
                {
                    warn!(error_kind = err.kind(), "recording failed while tool panicked");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    fn finish(
        &self,
        tool_name: &str,
        arguments: ToolArguments,
        duration_ms: u64,
        outcome: CallOutcome,
    ) -> WardenResult<()> {
        let (result, exception_kind) = match outcome {
            CallOutcome::Ok(rendered) => (Some(rendered), None),
            CallOutcome::Err(kind) => (None, Some(kind)),
            CallOutcome::Panicked => (None, Some(PANIC_KIND.to_owned())),
        };
        let success = exception_kind.is_none();

        if let Some(stats) = self.stats.lock().get_mut(tool_name) {
            stats.calls += 1;
            stats.total_duration_ms = stats.total_duration_ms.saturating_add(duration_ms);
            if !success {
                stats.errors += 1;
            }
        }

        self.recorder.record_with(|| {
            ToolCallEvent::new(tool_name, arguments, result, duration_ms, exception_kind)
                .map(EventKind::ToolCall)
        })?;
        debug!(duration_ms, success, "tool call intercepted");
        Ok(())
    }
}

fn describe<R: fmt::Debug, E: ToolFailure>(result: &Result<R, E>) -> CallOutcome {
    match result {
        Ok(value) => CallOutcome::Ok(format!("{value:?}")),
        Err(err) => {
            let kind = err.kind();
            if kind.trim().is_empty() {
                CallOutcome::Err("UnknownError".to_owned())
            } else {
                CallOutcome::Err(kind.into_owned())
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn render_plain(invocation: &ToolInvocation) -> ToolArguments {
    ToolArguments::new(
        invocation.positional.iter().map(render).collect(),
        invocation
            .keyword
            .iter()
            .map(|(name, value)| (name.clone(), render(value)))
            .collect(),
    )
}

fn mask_all(invocation: &ToolInvocation) -> ToolArguments {
    ToolArguments::new(
        vec![MASKED_PLACEHOLDER.to_owned(); invocation.positional.len()],
        invocation
            .keyword
            .keys()
            .map(|name| (name.clone(), MASKED_PLACEHOLDER.to_owned()))
            .collect(),
    )
}

/// Bind positional arguments to declared parameter names. Fails when there
/// are more positionals than parameters, a keyword is undeclared, or a
/// keyword repeats a positionally bound parameter.
fn bind_parameters<'a>(
    definition: &'a ToolDefinition,
    invocation: &ToolInvocation,
) -> Result<Vec<&'a String>, &'static str> {
    if invocation.positional.len() > definition.parameters.len() {
        return Err("too many positional arguments");
    }
    let bound: Vec<&String> = definition
        .parameters
        .iter()
        .take(invocation.positional.len())
        .collect();
    for name in invocation.keyword.keys() {
        if !definition.parameters.contains(name) {
            return Err("unexpected keyword argument");
        }
        if bound.contains(&name) {
            return Err("argument bound twice");
        }
    }
    Ok(bound)
}
