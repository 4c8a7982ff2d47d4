use std::sync::Arc;

use tracing::{info, instrument};
use warden_events::{EventRecorder, EventStreamHub};
use warden_memory::{KeyValueStore, MemoryAccessMonitor, MonitoredStore};
use warden_policy::ViolationCheck;
use warden_protocol::{
    AgentEvent, BaseJudge, InstrumentationConfig, JudgeContext, SessionId, WardenError,
    WardenResult,
};
use warden_runtime::{EvaluationReport, SecurityEvaluator};
use warden_tools::{ToolCallInterceptor, ToolDefinition};

pub struct WardenBuilder {
    config: InstrumentationConfig,
    judge: Option<Arc<dyn BaseJudge>>,
    tools: Vec<ToolDefinition>,
    checks: Vec<Box<dyn ViolationCheck>>,
    stream_buffer: Option<usize>,
    parallel_checks: bool,
}

impl WardenBuilder {
    pub fn new(config: InstrumentationConfig) -> Self {
        Self {
            config,
            judge: None,
            tools: Vec::new(),
            checks: Vec::new(),
            stream_buffer: None,
            parallel_checks: false,
        }
    }

    pub fn judge(mut self, judge: Arc<dyn BaseJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    /// Tool definitions registered on every session's interceptor.
    pub fn register_tool(mut self, definition: ToolDefinition) -> Self {
        self.tools.push(definition);
        self
    }

    /// Use `check` instead of the built-in detector for its category.
    pub fn replace_check(mut self, check: Box<dyn ViolationCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Publish every retained event to a shared broadcast hub.
    pub fn stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = Some(buffer);
        self
    }

    pub fn parallel_checks(mut self, parallel: bool) -> Self {
        self.parallel_checks = parallel;
        self
    }

    /// Validate the configuration and assemble the evaluator. All
    /// misconfiguration surfaces here, never at evaluation time.
    pub fn build(self) -> WardenResult<Warden> {
        self.config.validate()?;
        let judge = self
            .judge
            .ok_or_else(|| WardenError::InvalidConfig("base judge not configured".into()))?;
        let mut evaluator =
            SecurityEvaluator::new(&self.config, judge)?.with_parallel_checks(self.parallel_checks);
        for check in self.checks {
            evaluator.suite_mut().replace_check(check);
        }

        Ok(Warden {
            config: Arc::new(self.config),
            evaluator: Arc::new(evaluator),
            tools: Arc::new(self.tools),
            stream: self.stream_buffer.map(EventStreamHub::new),
        })
    }
}

/// Shared entry point. Cheap to clone; every session gets its own recorder.
#[derive(Clone)]
pub struct Warden {
    config: Arc<InstrumentationConfig>,
    evaluator: Arc<SecurityEvaluator>,
    tools: Arc<Vec<ToolDefinition>>,
    stream: Option<EventStreamHub>,
}

impl Warden {
    pub fn config(&self) -> &InstrumentationConfig {
        &self.config
    }

    #[instrument(skip(self), fields(session = %session_id))]
    pub fn open_session(&self, session_id: SessionId) -> WardenResult<SessionMonitor> {
        let mut recorder = EventRecorder::new(session_id, &self.config)?;
        if let Some(stream) = &self.stream {
            recorder = recorder.with_stream(stream.clone());
        }
        let recorder = Arc::new(recorder);

        let tools = if self.config.enable_tool_interception {
            ToolCallInterceptor::new(recorder.clone())
        } else {
            ToolCallInterceptor::disabled(recorder.clone())
        };
        for definition in self.tools.iter() {
            tools.register(definition.clone());
        }
        let memory = Arc::new(if self.config.enable_memory_monitoring {
            MemoryAccessMonitor::new(recorder.clone())
        } else {
            MemoryAccessMonitor::disabled(recorder.clone())
        });

        info!(
            capacity = recorder.capacity(),
            sampling_rate = recorder.sampling_rate(),
            "session opened"
        );
        Ok(SessionMonitor {
            recorder,
            tools,
            memory,
            evaluator: self.evaluator.clone(),
        })
    }

    /// Events retained by any session. `None` unless a stream buffer was
    /// configured.
    pub fn subscribe_events(&self) -> Option<tokio::sync::broadcast::Receiver<Arc<AgentEvent>>> {
        self.stream.as_ref().map(EventStreamHub::subscribe)
    }
}

/// Instrumentation for one agent session.
pub struct SessionMonitor {
    recorder: Arc<EventRecorder>,
    tools: ToolCallInterceptor,
    memory: Arc<MemoryAccessMonitor>,
    evaluator: Arc<SecurityEvaluator>,
}

impl SessionMonitor {
    pub fn session_id(&self) -> &SessionId {
        self.recorder.session_id()
    }

    pub fn recorder(&self) -> &Arc<EventRecorder> {
        &self.recorder
    }

    pub fn tools(&self) -> &ToolCallInterceptor {
        &self.tools
    }

    pub fn memory(&self) -> &Arc<MemoryAccessMonitor> {
        &self.memory
    }

    /// Wrap `store` so every access is recorded by this session.
    pub fn monitored_store<S: KeyValueStore>(&self, store: S) -> MonitoredStore<S> {
        MonitoredStore::new(store, self.memory.clone())
    }

    #[instrument(skip_all, fields(session = %self.session_id()))]
    pub async fn evaluate(
        &self,
        context: &JudgeContext,
        secret: Option<&str>,
    ) -> WardenResult<EvaluationReport> {
        self.evaluator.evaluate(&self.recorder, context, secret).await
    }
}
