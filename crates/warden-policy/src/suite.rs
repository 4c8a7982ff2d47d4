//! Runs every check against one snapshot, isolating check failures.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;

use tracing::{debug, instrument, warn};
use warden_protocol::{
    AgentEvent, InstrumentationConfig, ViolationCategory, ViolationResult, WardenResult,
};

use crate::checks::default_checks;
use crate::{CheckError, ViolationCheck};

/// Severity reported for a category whose check failed to run.
pub const FAILED_CHECK_SEVERITY: u8 = 9;

/// One check per [`ViolationCategory`], held in category order.
pub struct ViolationCheckSuite {
    checks: Vec<Box<dyn ViolationCheck>>,
}

impl ViolationCheckSuite {
    /// Build the default suite. Fails if the category catalog is incomplete
    /// or the configuration is invalid.
    pub fn new(config: &InstrumentationConfig) -> WardenResult<Self> {
        ViolationCategory::validate_catalog()?;
        config.validate()?;
        Ok(Self {
            checks: default_checks(config),
        })
    }

    /// Swap in a different detector for its category, returning the old one.
    pub fn replace_check(&mut self, check: Box<dyn ViolationCheck>) -> Box<dyn ViolationCheck> {
        let index = usize::from(check.category().number()) - 1;
        std::mem::replace(&mut self.checks[index], check)
    }

    pub fn categories(&self) -> impl Iterator<Item = ViolationCategory> + '_ {
        self.checks.iter().map(|check| check.category())
    }

    /// Run all checks in order. Always returns exactly one result per
    /// category, in category order.
    #[instrument(skip_all, fields(events = events.len()))]
    pub fn run(&self, events: &[Arc<AgentEvent>]) -> Vec<ViolationResult> {
        let results: Vec<_> = self
            .checks
            .iter()
            .map(|check| guarded(check.as_ref(), events))
            .collect();
        debug!(
            detected = results.iter().filter(|r| r.detected()).count(),
            "violation checks complete"
        );
        results
    }

    /// Same as [`Self::run`] with each check on its own scoped thread.
    #[instrument(skip_all, fields(events = events.len()))]
    pub fn run_parallel(&self, events: &[Arc<AgentEvent>]) -> Vec<ViolationResult> {
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .checks
                .iter()
                .map(|check| {
                    let category = check.category();
                    (category, scope.spawn(move || guarded(check.as_ref(), events)))
                })
                .collect();
            handles
                .into_iter()
                .map(|(category, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        failed_result(category, &CheckError::Failed("worker thread panicked".into()))
                    })
                })
                .collect()
        })
    }
}

impl std::fmt::Debug for ViolationCheckSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViolationCheckSuite")
            .field("checks", &self.checks.len())
            .finish()
    }
}

fn guarded(check: &dyn ViolationCheck, events: &[Arc<AgentEvent>]) -> ViolationResult {
    let category = check.category();
    let outcome = catch_unwind(AssertUnwindSafe(|| check.check(events)));
    let error = match outcome {
        Ok(Ok(result)) if result.category() == category => return result,
        Ok(Ok(result)) => CheckError::WrongCategory {
            expected: category,
            returned: result.category(),
        },
        Ok(Err(error)) => error,
        Err(payload) => CheckError::Failed(panic_message(payload.as_ref())),
    };
    failed_result(category, &error)
}

fn failed_result(category: ViolationCategory, error: &CheckError) -> ViolationResult {
    warn!(category = %category, "violation check failed; reporting as detected");
    ViolationResult::found(
        category,
        FAILED_CHECK_SEVERITY,
        format!("{category} check could not run: {error}"),
        "Repair the failing detector; treat this category as unverified until it runs cleanly",
    )
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use warden_protocol::{DivergenceSeverity, MemoryOperation};

    use super::*;
    use crate::testing::*;

    struct Broken(ViolationCategory);

    impl ViolationCheck for Broken {
        fn category(&self) -> ViolationCategory {
            self.0
        }

        fn check(&self, _events: &[Arc<AgentEvent>]) -> Result<ViolationResult, CheckError> {
            Err(CheckError::Failed("regex backend unavailable".into()))
        }
    }

    struct Panicking;

    impl ViolationCheck for Panicking {
        fn category(&self) -> ViolationCategory {
            ViolationCategory::GoalMisalignment
        }

        fn check(&self, _events: &[Arc<AgentEvent>]) -> Result<ViolationResult, CheckError> {
            panic!("index out of bounds")
        }
    }

    struct Mislabeled;

    impl ViolationCheck for Mislabeled {
        fn category(&self) -> ViolationCategory {
            ViolationCategory::WeakGuardrails
        }

        fn check(&self, _events: &[Arc<AgentEvent>]) -> Result<ViolationResult, CheckError> {
            Ok(ViolationResult::clear(ViolationCategory::ExcessiveAgency))
        }
    }

    fn mixed_events() -> Vec<Arc<AgentEvent>> {
        let mut events: Vec<_> = (0..6).map(|_| tool_ok("search")).collect();
        events.push(tool_err("transfer_funds", "PermissionDenied"));
        events.push(memory(MemoryOperation::Read, "api_token", true));
        events.push(divergence(DivergenceSeverity::High));
        events
    }

    #[test]
    fn one_result_per_category_in_order() {
        let suite = ViolationCheckSuite::new(&InstrumentationConfig::default()).unwrap();
        let results = suite.run(&mixed_events());
        let categories: Vec<_> = results.iter().map(ViolationResult::category).collect();
        assert_eq!(categories, ViolationCategory::ALL.to_vec());
        assert!(results[0].detected(), "six consecutive calls exceed five repeats");
        assert!(results[1].detected());
        assert!(results[3].detected());
        assert!(results[4].detected());
        assert!(results[5].detected());
        assert!(!results[8].detected());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = InstrumentationConfig {
            max_tool_calls: 0,
            ..InstrumentationConfig::default()
        };
        assert!(ViolationCheckSuite::new(&config).is_err());
    }

    #[test]
    fn failing_check_becomes_severity_nine_without_affecting_others() {
        let events = mixed_events();
        let baseline = ViolationCheckSuite::new(&InstrumentationConfig::default())
            .unwrap()
            .run(&events);

        let mut suite = ViolationCheckSuite::new(&InstrumentationConfig::default()).unwrap();
        suite.replace_check(Box::new(Broken(ViolationCategory::DataDisclosure)));
        let results = suite.run(&events);

        let failed = &results[5];
        assert_eq!(failed.category(), ViolationCategory::DataDisclosure);
        assert!(failed.detected());
        assert_eq!(failed.severity(), FAILED_CHECK_SEVERITY);
        assert!(failed.evidence().contains("regex backend unavailable"));
        for (index, (result, expected)) in results.iter().zip(&baseline).enumerate() {
            if index != 5 {
                assert_eq!(result, expected);
            }
        }
    }

    #[test]
    fn panicking_check_is_contained() {
        let mut suite = ViolationCheckSuite::new(&InstrumentationConfig::default()).unwrap();
        suite.replace_check(Box::new(Panicking));
        let results = suite.run(&[]);
        let failed = &results[7];
        assert!(failed.detected());
        assert_eq!(failed.severity(), FAILED_CHECK_SEVERITY);
        assert!(failed.evidence().contains("index out of bounds"));
        assert_eq!(results.iter().filter(|r| r.detected()).count(), 1);
    }

    #[test]
    fn result_for_wrong_category_is_treated_as_failure() {
        let mut suite = ViolationCheckSuite::new(&InstrumentationConfig::default()).unwrap();
        suite.replace_check(Box::new(Mislabeled));
        let results = suite.run(&[]);
        assert_eq!(results[8].category(), ViolationCategory::WeakGuardrails);
        assert!(results[8].detected());
        assert!(!results[0].detected());
    }

    #[test]
    fn parallel_run_matches_sequential() {
        let mut suite = ViolationCheckSuite::new(&InstrumentationConfig::default()).unwrap();
        suite.replace_check(Box::new(Panicking));
        let events = mixed_events();
        assert_eq!(suite.run(&events), suite.run_parallel(&events));
    }

    #[test]
    fn replace_returns_previous_check() {
        let mut suite = ViolationCheckSuite::new(&InstrumentationConfig::default()).unwrap();
        let previous = suite.replace_check(Box::new(Broken(ViolationCategory::ExcessiveAgency)));
        assert_eq!(previous.category(), ViolationCategory::ExcessiveAgency);
        assert_eq!(suite.categories().count(), 10);
    }
}
