//! Instrumentation configuration.
//!
//! Configuration is validated by the constructors that accept it and is held
//! immutably afterwards; nothing re-validates at call time.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{WardenError, WardenResult};

const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// Weights for the five terms of the overall risk formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub base: f64,
    pub violation: f64,
    pub tool: f64,
    pub memory: f64,
    pub divergence: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            base: 0.30,
            violation: 0.30,
            tool: 0.15,
            memory: 0.15,
            divergence: 0.10,
        }
    }
}

impl RiskWeights {
    pub fn sum(&self) -> f64 {
        self.base + self.violation + self.tool + self.memory + self.divergence
    }

    pub fn validate(&self) -> WardenResult<()> {
        let named = [
            ("base", self.base),
            ("violation", self.violation),
            ("tool", self.tool),
            ("memory", self.memory),
            ("divergence", self.divergence),
        ];
        for (name, weight) in named {
            if !weight.is_finite() || weight < 0.0 {
                return Err(WardenError::InvalidConfig(format!(
                    "risk weight {name} must be a finite non-negative number, got {weight}"
                )));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(WardenError::InvalidConfig(format!(
                "risk weights must sum to 1.0 (±{WEIGHT_SUM_TOLERANCE}), got {sum}"
            )));
        }
        Ok(())
    }
}

fn default_dangerous_keywords() -> IndexSet<String> {
    [
        "delete", "remove", "drop", "transfer", "pay", "payment", "grant", "revoke", "execute",
        "exec", "sudo", "shutdown", "wire",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// Full configuration surface of the instrumentation core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    pub enable_tool_interception: bool,
    pub enable_memory_monitoring: bool,
    /// Fraction of events kept, in `[0, 1]`.
    pub sampling_rate: f64,
    /// Seed for the sampling source. `None` seeds from the OS.
    pub sampling_seed: Option<u64>,
    pub max_events: usize,
    pub risk_weights: RiskWeights,
    pub max_tool_calls: usize,
    pub max_consecutive_repeats: usize,
    pub dangerous_tool_keywords: IndexSet<String>,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            enable_tool_interception: true,
            enable_memory_monitoring: true,
            sampling_rate: 1.0,
            sampling_seed: None,
            max_events: 10_000,
            risk_weights: RiskWeights::default(),
            max_tool_calls: 50,
            max_consecutive_repeats: 5,
            dangerous_tool_keywords: default_dangerous_keywords(),
        }
    }
}

impl InstrumentationConfig {
    pub fn validate(&self) -> WardenResult<()> {
        if !(0.0..=1.0).contains(&self.sampling_rate) {
            return Err(WardenError::InvalidConfig(format!(
                "sampling_rate must be within [0, 1], got {}",
                self.sampling_rate
            )));
        }
        if self.max_events == 0 {
            return Err(WardenError::InvalidConfig(
                "max_events must be greater than zero".into(),
            ));
        }
        if self.max_tool_calls == 0 {
            return Err(WardenError::InvalidConfig(
                "max_tool_calls must be greater than zero".into(),
            ));
        }
        if self.max_consecutive_repeats == 0 {
            return Err(WardenError::InvalidConfig(
                "max_consecutive_repeats must be greater than zero".into(),
            ));
        }
        if self
            .dangerous_tool_keywords
            .iter()
            .any(|keyword| keyword.trim().is_empty())
        {
            return Err(WardenError::InvalidConfig(
                "dangerous_tool_keywords must not contain blank entries".into(),
            ));
        }
        self.risk_weights.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = InstrumentationConfig::default();
        config.validate().unwrap();
        assert!(config.dangerous_tool_keywords.contains("transfer"));
    }

    #[test]
    fn weights_must_sum_to_one() {
        let weights = RiskWeights {
            base: 0.5,
            violation: 0.5,
            tool: 0.5,
            memory: 0.0,
            divergence: 0.0,
        };
        assert!(weights.validate().is_err());

        let close_enough = RiskWeights {
            base: 0.333,
            violation: 0.333,
            tool: 0.333,
            memory: 0.0,
            divergence: 0.0,
        };
        close_enough.validate().unwrap();
    }

    #[test]
    fn negative_weight_is_rejected() {
        let weights = RiskWeights {
            base: 1.2,
            violation: -0.2,
            ..RiskWeights::default()
        };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn capacity_and_sampling_are_checked() {
        let zero = InstrumentationConfig {
            max_events: 0,
            ..InstrumentationConfig::default()
        };
        assert!(zero.validate().is_err());

        let oversampled = InstrumentationConfig {
            sampling_rate: 1.5,
            ..InstrumentationConfig::default()
        };
        assert!(oversampled.validate().is_err());
    }

    #[test]
    fn partial_config_deserializes_with_defaults() {
        let config: InstrumentationConfig =
            serde_json::from_str(r#"{"max_events": 32, "sampling_rate": 0.5}"#).unwrap();
        assert_eq!(config.max_events, 32);
        assert_eq!(config.max_tool_calls, 50);
        config.validate().unwrap();
    }
}
