use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, instrument, warn};
use warden_protocol::{
    ActionRecord, AgentEvent, DivergenceEvent, EventId, EventKind, InstrumentationConfig,
    SessionId, SpeechRecord, WardenError, WardenResult,
};

/// Recording failures tolerated before the recorder declares itself
/// compromised. The failure that exceeds this count is fatal.
pub const FAILURE_THRESHOLD: u32 = 10;

/// A point-in-time copy of the buffer. Events are shared, not cloned.
pub type EventSnapshot = Vec<Arc<AgentEvent>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Retained(EventId),
    SampledOut,
    /// Building the event failed; counted toward the failure guard.
    Failed,
}

impl RecordOutcome {
    pub fn is_retained(&self) -> bool {
        matches!(self, Self::Retained(_))
    }

    pub fn event_id(&self) -> Option<&EventId> {
        match self {
            Self::Retained(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub retained: u64,
    pub sampled_out: u64,
    pub evicted: u64,
    pub failures: u32,
}

#[derive(Debug)]
struct RecorderState {
    buffer: VecDeque<Arc<AgentEvent>>,
    rng: StdRng,
    stats: RecorderStats,
    compromised: bool,
}

/// Thread-safe bounded event buffer for one agent session.
///
/// The sampling decision, the append-with-eviction and the failure counter
/// all live behind one lock, so concurrent producers can never both claim the
/// last free slot.
#[derive(Debug)]
pub struct EventRecorder {
    session_id: SessionId,
    max_events: usize,
    sampling_rate: f64,
    state: Mutex<RecorderState>,
    stream: Option<EventStreamHub>,
}

impl EventRecorder {
    pub fn new(session_id: SessionId, config: &InstrumentationConfig) -> WardenResult<Self> {
        config.validate()?;
        let rng = match config.sampling_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            session_id,
            max_events: config.max_events,
            sampling_rate: config.sampling_rate,
            state: Mutex::new(RecorderState {
                buffer: VecDeque::with_capacity(config.max_events.min(1024)),
                rng,
                stats: RecorderStats::default(),
                compromised: false,
            }),
            stream: None,
        })
    }

    /// Publish every retained event to `hub` as well.
    pub fn with_stream(mut self, hub: EventStreamHub) -> Self {
        self.stream = Some(hub);
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn capacity(&self) -> usize {
        self.max_events
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    /// Wrap `kind` in this session's envelope and record it.
    pub fn record(&self, kind: EventKind) -> WardenResult<RecordOutcome> {
        self.record_with(|| Ok(kind))
    }

    /// Record an already-built event. An event stamped with another
    /// session's id is a recording failure.
    pub fn record_event(&self, event: AgentEvent) -> WardenResult<RecordOutcome> {
        if event.session_id() != &self.session_id {
            return self.append(Err(WardenError::InvalidEvent(format!(
                "event belongs to session {}",
                event.session_id()
            ))));
        }
        self.append(Ok(event))
    }

    /// Build the payload with `build` and record it. A builder error is a
    /// recording failure: it is counted and logged by kind only, and becomes
    /// fatal once [`FAILURE_THRESHOLD`] is exceeded.
    pub fn record_with<F>(&self, build: F) -> WardenResult<RecordOutcome>
    where
        F: FnOnce() -> WardenResult<EventKind>,
    {
        let built = build().map(|kind| AgentEvent::new(self.session_id.clone(), kind));
        self.append(built)
    }

    pub fn record_speech(
        &self,
        content: impl Into<String>,
        intent: Option<String>,
        is_response_to_user: bool,
    ) -> WardenResult<RecordOutcome> {
        let content = content.into();
        self.record_with(|| {
            SpeechRecord::new(content, intent, is_response_to_user).map(EventKind::Speech)
        })
    }

    pub fn record_action(&self, action: ActionRecord) -> WardenResult<RecordOutcome> {
        self.record(EventKind::Action(action))
    }

    pub fn record_divergence(&self, divergence: DivergenceEvent) -> WardenResult<RecordOutcome> {
        self.record(EventKind::Divergence(divergence))
    }

    fn append(&self, built: WardenResult<AgentEvent>) -> WardenResult<RecordOutcome> {
        let mut state = self.state.lock();
        if state.compromised {
            return Err(WardenError::InstrumentationCompromised {
                failures: state.stats.failures,
            });
        }

        let event = match built {
            Ok(event) => event,
            Err(err) => {
                state.stats.failures = state.stats.failures.saturating_add(1);
                let failures = state.stats.failures;
                warn!(
                    session_id = %self.session_id,
                    error_kind = err.kind(),
                    failures,
                    "event recording failed"
                );
                if failures > FAILURE_THRESHOLD {
                    state.compromised = true;
                    error!(
                        session_id = %self.session_id,
                        failures,
                        "instrumentation compromised, recorder stopped"
                    );
                    return Err(WardenError::InstrumentationCompromised { failures });
                }
                return Ok(RecordOutcome::Failed);
            }
        };

        let keep = if self.sampling_rate >= 1.0 {
            true
        } else if self.sampling_rate <= 0.0 {
            false
        } else {
            state.rng.random::<f64>() < self.sampling_rate
        };
        if !keep {
            state.stats.sampled_out += 1;
            return Ok(RecordOutcome::SampledOut);
        }

        if state.buffer.len() >= self.max_events {
            state.buffer.pop_front();
            state.stats.evicted += 1;
        }
        let event = Arc::new(event);
        let event_id = event.event_id().clone();
        state.buffer.push_back(event.clone());
        state.stats.retained += 1;
        // Published under the lock so subscribers see buffer order.
        if let Some(stream) = &self.stream {
            stream.publish(event);
        }
        Ok(RecordOutcome::Retained(event_id))
    }

    /// Copy the current buffer, oldest first. Holds the lock only while the
    /// `Arc`s are cloned.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub fn snapshot(&self) -> EventSnapshot {
        let snapshot: EventSnapshot = self.state.lock().buffer.iter().cloned().collect();
        debug!(count = snapshot.len(), "event snapshot taken");
        snapshot
    }

    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().buffer.is_empty()
    }

    pub fn stats(&self) -> RecorderStats {
        self.state.lock().stats
    }

    pub fn is_compromised(&self) -> bool {
        self.state.lock().compromised
    }

    /// `Err(InstrumentationCompromised)` once the failure guard has tripped.
    /// Callers check this before producing side effects they would record.
    pub fn ensure_active(&self) -> WardenResult<()> {
        let state = self.state.lock();
        if state.compromised {
            return Err(WardenError::InstrumentationCompromised {
                failures: state.stats.failures,
            });
        }
        Ok(())
    }

    /// Drop all buffered events. The failure guard is not reset.
    pub fn clear(&self) {
        self.state.lock().buffer.clear();
    }
}

/// Live fan-out of retained events to any number of subscribers.
#[derive(Clone, Debug)]
pub struct EventStreamHub {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventStreamHub {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: Arc<AgentEvent>) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<Arc<AgentEvent>> {
        BroadcastStream::new(self.sender.subscribe())
    }
}
