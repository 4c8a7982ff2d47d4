//! Violation detection over a captured event stream.
//!
//! Each [`ViolationCheck`] scans an immutable snapshot for one
//! [`ViolationCategory`]. Checks are pure heuristics (counts, thresholds,
//! lexicons and patterns) and share no state, so the
//! [`ViolationCheckSuite`] may run them in any order or in parallel.

use std::sync::Arc;

use thiserror::Error;
use warden_protocol::{AgentEvent, ViolationCategory, ViolationResult};

pub mod checks;
pub mod suite;
#[cfg(test)]
mod testing;

pub use checks::{
    DataDisclosureCheck, ExcessiveAgencyCheck, GoalMisalignmentCheck, ImproperAuthorizationCheck,
    IndirectPromptInjectionCheck, InadequateOversightCheck, InsecureMemoryCheck,
    OverTrustCheck, VulnerableIntegrationsCheck, WeakGuardrailsCheck, default_checks,
};
pub use suite::{FAILED_CHECK_SEVERITY, ViolationCheckSuite};

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("check failed: {0}")]
    Failed(String),
    #[error("check for {expected} reported {returned}")]
    WrongCategory {
        expected: ViolationCategory,
        returned: ViolationCategory,
    },
}

/// Detector for a single violation category.
pub trait ViolationCheck: Send + Sync {
    fn category(&self) -> ViolationCategory;

    fn check(&self, events: &[Arc<AgentEvent>]) -> Result<ViolationResult, CheckError>;
}
