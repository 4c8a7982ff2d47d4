use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};
use warden_events::EventRecorder;
use warden_policy::ViolationCheckSuite;
use warden_protocol::{
    AgentEvent, AggregateScore, BaseJudge, EvaluationId, InstrumentationConfig, JudgeContext,
    JudgeVerdict, SessionId, WardenResult,
};

use crate::aggregator::RiskAggregator;

/// One completed evaluation of a session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub evaluation_id: EvaluationId,
    pub session_id: SessionId,
    pub score: AggregateScore,
    pub events_evaluated: usize,
    /// True when the base judge failed and the fallback verdict was used.
    pub judge_failed: bool,
    pub judge_reasoning: String,
    /// SHA-256 (hex) of the snapshot's canonical JSON.
    pub snapshot_digest: String,
    pub evaluated_at: DateTime<Utc>,
}

/// Drives snapshot → checks → judge → aggregation.
pub struct SecurityEvaluator {
    suite: ViolationCheckSuite,
    aggregator: RiskAggregator,
    judge: Arc<dyn BaseJudge>,
    parallel_checks: bool,
}

impl SecurityEvaluator {
    pub fn new(config: &InstrumentationConfig, judge: Arc<dyn BaseJudge>) -> WardenResult<Self> {
        Ok(Self {
            suite: ViolationCheckSuite::new(config)?,
            aggregator: RiskAggregator::new(config.risk_weights)?,
            judge,
            parallel_checks: false,
        })
    }

    pub fn with_parallel_checks(mut self, parallel: bool) -> Self {
        self.parallel_checks = parallel;
        self
    }

    pub fn suite_mut(&mut self) -> &mut ViolationCheckSuite {
        &mut self.suite
    }

    pub fn aggregator(&self) -> &RiskAggregator {
        &self.aggregator
    }

    /// Evaluate the recorder's current snapshot. Recording may continue
    /// concurrently; later events are simply not part of this evaluation.
    pub async fn evaluate(
        &self,
        recorder: &EventRecorder,
        context: &JudgeContext,
        secret: Option<&str>,
    ) -> WardenResult<EvaluationReport> {
        let snapshot = recorder.snapshot();
        self.evaluate_snapshot(recorder.session_id().clone(), &snapshot, context, secret)
            .await
    }

    #[instrument(skip_all, fields(session = %session_id, events = events.len()))]
    pub async fn evaluate_snapshot(
        &self,
        session_id: SessionId,
        events: &[Arc<AgentEvent>],
        context: &JudgeContext,
        secret: Option<&str>,
    ) -> WardenResult<EvaluationReport> {
        let snapshot_digest = snapshot_digest(events)?;
        let violations = if self.parallel_checks {
            self.suite.run_parallel(events)
        } else {
            self.suite.run(events)
        };
        let (verdict, judge_failed) = self.consult_judge(context, secret).await;
        let score = self.aggregator.aggregate(&verdict, violations, events)?;

        info!(
            overall_risk = score.overall_risk(),
            detected = score.detected().count(),
            judge_failed,
            "evaluation complete"
        );
        Ok(EvaluationReport {
            evaluation_id: EvaluationId::default(),
            session_id,
            score,
            events_evaluated: events.len(),
            judge_failed,
            judge_reasoning: verdict.reasoning,
            snapshot_digest,
            evaluated_at: Utc::now(),
        })
    }

    /// Ask the base judge, substituting the fallback verdict on error or on
    /// an out-of-range score.
    async fn consult_judge(
        &self,
        context: &JudgeContext,
        secret: Option<&str>,
    ) -> (JudgeVerdict, bool) {
        match self.judge.judge(context, secret).await {
            Ok(verdict) => match verdict.validate() {
                Ok(()) => (verdict, false),
                Err(error) => {
                    warn!(error_kind = error.kind(), "base judge returned an invalid verdict");
                    (JudgeVerdict::fallback(format!("invalid verdict ({})", error.kind())), true)
                }
            },
            Err(error) => {
                warn!(error_kind = error.kind(), "base judge failed");
                (JudgeVerdict::fallback(error.kind()), true)
            }
        }
    }
}

fn snapshot_digest(events: &[Arc<AgentEvent>]) -> WardenResult<String> {
    let canonical: Vec<&AgentEvent> = events.iter().map(Arc::as_ref).collect();
    let payload = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(Sha256::digest(&payload)))
}
