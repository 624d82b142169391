//! Alarm policies, states, and events.
//!
//! An alarm watches one (target, metric) pair. Its policy is a threshold, a
//! comparator, an evaluation window of recent datapoints, and the number of
//! consecutive breaches required to fire.

mod evaluator;

pub use evaluator::*;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::MetricName;

/// Comparison applied to a datapoint value against the policy threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
}

impl Comparator {
    /// True when `value` breaches `threshold` under this comparator.
    pub fn breaches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::LessThan => value < threshold,
            Comparator::GreaterThan => value > threshold,
            Comparator::LessThanOrEqual => value <= threshold,
            Comparator::GreaterThanOrEqual => value >= threshold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::LessThan => "<",
            Comparator::GreaterThan => ">",
            Comparator::LessThanOrEqual => "<=",
            Comparator::GreaterThanOrEqual => ">=",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alarm policy error types.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("breach_count must be at least 1")]
    ZeroBreachCount,
    #[error("breach_count {breach_count} exceeds window {window}")]
    BreachCountExceedsWindow { breach_count: usize, window: usize },
    #[error("window must be at least 1")]
    ZeroWindow,
}

/// Threshold policy for one metric, validated once at load time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlarmPolicy {
    pub comparator: Comparator,
    pub threshold: f64,
    /// Evaluation window: number of most recent datapoints retained.
    pub window: usize,
    /// Consecutive breaching datapoints required to enter ALARM.
    pub breach_count: usize,
}

impl AlarmPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.window == 0 {
            return Err(PolicyError::ZeroWindow);
        }
        if self.breach_count == 0 {
            return Err(PolicyError::ZeroBreachCount);
        }
        if self.breach_count > self.window {
            return Err(PolicyError::BreachCountExceedsWindow {
                breach_count: self.breach_count,
                window: self.window,
            });
        }
        Ok(())
    }
}

/// Per-metric alarm policies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlarmPolicies {
    pub availability: AlarmPolicy,
    pub latency: AlarmPolicy,
}

impl Default for AlarmPolicies {
    /// Fire fast on availability (any down cycle), tolerate latency noise
    /// (three consecutive slow cycles above 1500 ms).
    fn default() -> Self {
        Self {
            availability: AlarmPolicy {
                comparator: Comparator::LessThan,
                threshold: 1.0,
                window: 5,
                breach_count: 1,
            },
            latency: AlarmPolicy {
                comparator: Comparator::GreaterThan,
                threshold: 1500.0,
                window: 5,
                breach_count: 3,
            },
        }
    }
}

impl AlarmPolicies {
    pub fn validate(&self) -> Result<(), PolicyError> {
        self.availability.validate()?;
        self.latency.validate()?;
        Ok(())
    }

    pub fn for_metric(&self, metric: MetricName) -> AlarmPolicy {
        match metric {
            MetricName::Availability => self.availability,
            MetricName::Latency => self.latency,
        }
    }
}

/// State of one (target, metric) alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    InsufficientData,
    Ok,
    Alarm,
}

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::InsufficientData => "INSUFFICIENT_DATA",
            AlarmState::Ok => "OK",
            AlarmState::Alarm => "ALARM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSUFFICIENT_DATA" => Some(AlarmState::InsufficientData),
            "OK" => Some(AlarmState::Ok),
            "ALARM" => Some(AlarmState::Alarm),
            _ => None,
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of one alarm state transition.
///
/// Created only when the state actually changed; re-entering the same state
/// produces no event.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmEvent {
    pub target: String,
    pub metric: MetricName,
    pub previous: AlarmState,
    pub new_state: AlarmState,
    pub time: DateTime<Utc>,
    /// The datapoint value that triggered the transition.
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparator_breaches() {
        assert!(Comparator::LessThan.breaches(0.0, 1.0));
        assert!(!Comparator::LessThan.breaches(1.0, 1.0));
        assert!(Comparator::GreaterThan.breaches(1501.0, 1500.0));
        assert!(!Comparator::GreaterThan.breaches(1500.0, 1500.0));
        assert!(Comparator::LessThanOrEqual.breaches(1.0, 1.0));
        assert!(Comparator::GreaterThanOrEqual.breaches(1500.0, 1500.0));
    }

    #[test]
    fn test_policy_validation() {
        let mut policy = AlarmPolicies::default().availability;
        assert!(policy.validate().is_ok());

        policy.breach_count = 0;
        assert!(matches!(
            policy.validate(),
            Err(PolicyError::ZeroBreachCount)
        ));

        policy.breach_count = 10;
        policy.window = 5;
        assert!(matches!(
            policy.validate(),
            Err(PolicyError::BreachCountExceedsWindow { .. })
        ));
    }

    #[test]
    fn test_comparator_serde_symbols() {
        let policy: AlarmPolicy = serde_json::from_str(
            r#"{"comparator": ">=", "threshold": 2.0, "window": 3, "breach_count": 2}"#,
        )
        .unwrap();
        assert_eq!(policy.comparator, Comparator::GreaterThanOrEqual);
    }

    #[test]
    fn test_state_round_trip() {
        for state in [AlarmState::InsufficientData, AlarmState::Ok, AlarmState::Alarm] {
            assert_eq!(AlarmState::parse(state.as_str()), Some(state));
        }
        assert_eq!(AlarmState::parse("bogus"), None);
    }
}
