//! Judge verdicts and aggregate risk scores.

use serde::{Deserialize, Serialize};

use crate::error::{WardenError, WardenResult};
use crate::event::DivergenceEvent;
use crate::violation::{ViolationCategory, ViolationResult};

pub const MAX_SCORE: f64 = 10.0;
pub const MAX_DIVERGENCE_EXAMPLES: usize = 5;

fn require_score(field: &str, value: f64) -> WardenResult<()> {
    if !(0.0..=MAX_SCORE).contains(&value) {
        return Err(WardenError::InvalidScore(format!(
            "{field} {value} outside [0, {MAX_SCORE}]"
        )));
    }
    Ok(())
}

/// Qualitative verdict from the external base judge. `score` is a safety
/// score: 10 is safe, 0 is unsafe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub score: f64,
    #[serde(default)]
    pub leaked_secret: bool,
    #[serde(default)]
    pub leaked_instructions: bool,
    #[serde(default)]
    pub reasoning: String,
}

impl JudgeVerdict {
    /// Substitute used when the judge fails: the qualitative term is scored
    /// as maximal risk and no leak is claimed.
    pub fn fallback(reason: impl AsRef<str>) -> Self {
        Self {
            score: 0.0,
            leaked_secret: false,
            leaked_instructions: false,
            reasoning: format!("base judge unavailable: {}", reason.as_ref()),
        }
    }

    pub fn validate(&self) -> WardenResult<()> {
        require_score("judge score", self.score)
    }
}

/// The single number and supporting detail produced by one evaluation.
///
/// Holds exactly one [`ViolationResult`] per category, in taxonomy order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AggregateScoreWire")]
pub struct AggregateScore {
    base_score: f64,
    violations: Vec<ViolationResult>,
    tool_score: f64,
    memory_score: f64,
    divergence_count: u32,
    divergence_examples: Vec<DivergenceEvent>,
    overall_risk: f64,
    recommendations: Vec<String>,
}

#[derive(Deserialize)]
struct AggregateScoreWire {
    base_score: f64,
    violations: Vec<ViolationResult>,
    tool_score: f64,
    memory_score: f64,
    divergence_count: u32,
    #[serde(default)]
    divergence_examples: Vec<DivergenceEvent>,
    overall_risk: f64,
    #[serde(default)]
    recommendations: Vec<String>,
}

impl TryFrom<AggregateScoreWire> for AggregateScore {
    type Error = WardenError;

    fn try_from(wire: AggregateScoreWire) -> WardenResult<Self> {
        AggregateScoreParts {
            base_score: wire.base_score,
            violations: wire.violations,
            tool_score: wire.tool_score,
            memory_score: wire.memory_score,
            divergence_count: wire.divergence_count,
            divergence_examples: wire.divergence_examples,
            overall_risk: wire.overall_risk,
            recommendations: wire.recommendations,
        }
        .build()
    }
}

/// Unvalidated inputs for an [`AggregateScore`].
#[derive(Debug, Clone)]
pub struct AggregateScoreParts {
    pub base_score: f64,
    pub violations: Vec<ViolationResult>,
    pub tool_score: f64,
    pub memory_score: f64,
    pub divergence_count: u32,
    pub divergence_examples: Vec<DivergenceEvent>,
    pub overall_risk: f64,
    pub recommendations: Vec<String>,
}

impl AggregateScoreParts {
    pub fn build(self) -> WardenResult<AggregateScore> {
        require_score("base_score", self.base_score)?;
        require_score("tool_score", self.tool_score)?;
        require_score("memory_score", self.memory_score)?;
        require_score("overall_risk", self.overall_risk)?;

        if self.violations.len() != ViolationCategory::ALL.len() {
            return Err(WardenError::InvalidScore(format!(
                "expected {} violation results, got {}",
                ViolationCategory::ALL.len(),
                self.violations.len()
            )));
        }
        for (result, expected) in self.violations.iter().zip(ViolationCategory::ALL) {
            if result.category() != expected {
                return Err(WardenError::InvalidScore(format!(
                    "violation result for {} found where {expected} was expected",
                    result.category()
                )));
            }
        }

        if self.divergence_examples.len() > MAX_DIVERGENCE_EXAMPLES {
            return Err(WardenError::InvalidScore(format!(
                "at most {MAX_DIVERGENCE_EXAMPLES} divergence examples allowed, got {}",
                self.divergence_examples.len()
            )));
        }
        let examples = u32::try_from(self.divergence_examples.len()).unwrap_or(u32::MAX);
        if self.divergence_count < examples {
            return Err(WardenError::InvalidScore(format!(
                "divergence_count {} is below the {examples} examples given",
                self.divergence_count
            )));
        }

        Ok(AggregateScore {
            base_score: self.base_score,
            violations: self.violations,
            tool_score: self.tool_score,
            memory_score: self.memory_score,
            divergence_count: self.divergence_count,
            divergence_examples: self.divergence_examples,
            overall_risk: self.overall_risk,
            recommendations: self.recommendations,
        })
    }
}

impl AggregateScore {
    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    pub fn violations(&self) -> &[ViolationResult] {
        &self.violations
    }

    pub fn violation(&self, category: ViolationCategory) -> &ViolationResult {
        // Position is guaranteed by construction.
        &self.violations[usize::from(category.number()) - 1]
    }

    pub fn detected(&self) -> impl Iterator<Item = &ViolationResult> {
        self.violations.iter().filter(|result| result.detected())
    }

    pub fn tool_score(&self) -> f64 {
        self.tool_score
    }

    pub fn memory_score(&self) -> f64 {
        self.memory_score
    }

    pub fn divergence_count(&self) -> u32 {
        self.divergence_count
    }

    pub fn divergence_examples(&self) -> &[DivergenceEvent] {
        &self.divergence_examples
    }

    pub fn overall_risk(&self) -> f64 {
        self.overall_risk
    }

    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DivergenceSeverity;

    fn clear_results() -> Vec<ViolationResult> {
        ViolationCategory::ALL
            .into_iter()
            .map(ViolationResult::clear)
            .collect()
    }

    fn divergence() -> DivergenceEvent {
        DivergenceEvent::new("read", "delete", DivergenceSeverity::Medium, "mismatch", 0.7)
            .unwrap()
    }

    fn parts() -> AggregateScoreParts {
        AggregateScoreParts {
            base_score: 8.5,
            violations: clear_results(),
            tool_score: 10.0,
            memory_score: 9.5,
            divergence_count: 1,
            divergence_examples: vec![divergence()],
            overall_risk: 1.25,
            recommendations: vec!["Review tool permissions".into()],
        }
    }

    #[test]
    fn aggregate_score_roundtrip() {
        let score = parts().build().unwrap();
        let json = serde_json::to_string(&score).unwrap();
        let back: AggregateScore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, score);
    }

    #[test]
    fn divergence_count_below_examples_is_rejected() {
        let mut bad = parts();
        bad.divergence_count = 0;
        assert!(bad.build().is_err());
    }

    #[test]
    fn more_than_five_examples_is_rejected() {
        let mut bad = parts();
        bad.divergence_examples = vec![divergence(); 6];
        bad.divergence_count = 6;
        assert!(bad.build().is_err());
    }

    #[test]
    fn violations_must_cover_each_category_in_order() {
        let mut missing = parts();
        missing.violations.pop();
        assert!(missing.build().is_err());

        let mut swapped = parts();
        swapped.violations.swap(0, 1);
        assert!(swapped.build().is_err());
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        let mut bad = parts();
        bad.overall_risk = 10.5;
        assert!(bad.build().is_err());

        let mut negative = parts();
        negative.tool_score = -0.1;
        assert!(negative.build().is_err());
    }

    #[test]
    fn violation_lookup_by_category() {
        let score = parts().build().unwrap();
        for category in ViolationCategory::ALL {
            assert_eq!(score.violation(category).category(), category);
        }
    }

    #[test]
    fn fallback_verdict_is_maximal_risk_and_neutral() {
        let verdict = JudgeVerdict::fallback("Timeout");
        assert_eq!(verdict.score, 0.0);
        assert!(!verdict.leaked_secret);
        assert!(!verdict.leaked_instructions);
        assert!(verdict.reasoning.contains("Timeout"));
        verdict.validate().unwrap();
    }
}
