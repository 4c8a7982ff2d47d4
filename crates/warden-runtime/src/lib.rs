//! Evaluation pipeline: snapshot → violation checks → base judge → risk.
//!
//! [`RiskAggregator`] folds heterogeneous signals into one deterministic
//! 0–10 risk value. [`SecurityEvaluator`] drives a full evaluation and
//! always produces a report, substituting a fallback verdict when the
//! base judge fails.

pub mod aggregator;
pub mod evaluator;
pub mod judge;

pub use aggregator::{RiskAggregator, SEVERITY_PENALTY};
pub use evaluator::{EvaluationReport, SecurityEvaluator};
pub use judge::StaticJudge;
