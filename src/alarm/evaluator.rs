//! Per-(target, metric) alarm state machine.
//!
//! Entering ALARM requires the most recent `breach_count` datapoints to all
//! breach; leaving it takes a single non-breaching datapoint. Missing data
//! withholds a datapoint and delays window completion, it never counts as a
//! breach or a recovery.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use crate::metrics::{Datapoint, MetricName};

use super::{AlarmEvent, AlarmPolicies, AlarmPolicy, AlarmState};

/// Identity of one alarm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlarmKey {
    pub target: String,
    pub metric: MetricName,
}

/// Mutable state behind one alarm's per-key lock.
#[derive(Debug)]
struct Cell {
    policy: AlarmPolicy,
    /// Most recent datapoint values, trimmed to the policy window.
    window: VecDeque<f64>,
    state: AlarmState,
    last_transition: Option<DateTime<Utc>>,
    breach_streak: usize,
    clear_streak: usize,
}

impl Cell {
    fn new(policy: AlarmPolicy) -> Self {
        Self {
            policy,
            window: VecDeque::with_capacity(policy.window),
            state: AlarmState::InsufficientData,
            last_transition: None,
            breach_streak: 0,
            clear_streak: 0,
        }
    }

    /// Apply one datapoint and return the transition event, if any.
    fn apply(&mut self, key: &AlarmKey, time: DateTime<Utc>, value: f64) -> Option<AlarmEvent> {
        self.window.push_back(value);
        while self.window.len() > self.policy.window {
            self.window.pop_front();
        }

        let breaching = self.policy.comparator.breaches(value, self.policy.threshold);
        if breaching {
            self.breach_streak += 1;
            self.clear_streak = 0;
        } else {
            self.clear_streak += 1;
            self.breach_streak = 0;
        }

        let next = self.next_state(breaching);
        if next == self.state {
            return None;
        }

        let previous = self.state;
        self.state = next;
        self.last_transition = Some(time);

        Some(AlarmEvent {
            target: key.target.clone(),
            metric: key.metric,
            previous,
            new_state: next,
            time,
            value,
        })
    }

    fn next_state(&self, breaching: bool) -> AlarmState {
        let b = self.policy.breach_count;
        match self.state {
            // Stay until b datapoints exist, then classify like OK would.
            AlarmState::InsufficientData => {
                if self.window.len() < b {
                    AlarmState::InsufficientData
                } else if self.breach_streak >= b {
                    AlarmState::Alarm
                } else {
                    AlarmState::Ok
                }
            }
            AlarmState::Ok => {
                if self.breach_streak >= b {
                    AlarmState::Alarm
                } else {
                    AlarmState::Ok
                }
            }
            // Asymmetric: one non-breaching datapoint recovers.
            AlarmState::Alarm => {
                if breaching {
                    AlarmState::Alarm
                } else {
                    AlarmState::Ok
                }
            }
        }
    }
}

/// Read-only view of one alarm's current state.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmStatus {
    pub state: AlarmState,
    pub last_transition: Option<DateTime<Utc>>,
    pub breach_streak: usize,
    pub clear_streak: usize,
}

/// Keyed store of alarm state machines.
///
/// The map lock only guards cell creation and removal; each evaluation takes
/// the per-key lock, so independent targets evaluate concurrently without
/// contending on a global lock.
pub struct AlarmEvaluator {
    policies: RwLock<AlarmPolicies>,
    cells: RwLock<HashMap<AlarmKey, Arc<Mutex<Cell>>>>,
}

impl AlarmEvaluator {
    pub fn new(policies: AlarmPolicies) -> Self {
        Self {
            policies: RwLock::new(policies),
            cells: RwLock::new(HashMap::new()),
        }
    }

    fn cell(&self, key: &AlarmKey) -> Arc<Mutex<Cell>> {
        if let Some(cell) = self.cells.read().unwrap().get(key) {
            return cell.clone();
        }

        let policy = self.policies.read().unwrap().for_metric(key.metric);
        let mut cells = self.cells.write().unwrap();
        cells
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Cell::new(policy))))
            .clone()
    }

    /// Feed one datapoint through its alarm and return the transition, if
    /// the state changed. State, transition timestamp and streak counters
    /// update atomically under the per-key lock.
    pub fn evaluate(&self, datapoint: &Datapoint) -> Option<AlarmEvent> {
        let key = AlarmKey {
            target: datapoint.target.clone(),
            metric: datapoint.metric,
        };
        let cell = self.cell(&key);
        let mut cell = cell.lock().unwrap();
        cell.apply(&key, datapoint.time, datapoint.value)
    }

    /// Current state of one alarm, if it has ever seen a datapoint.
    pub fn status(&self, target: &str, metric: MetricName) -> Option<AlarmStatus> {
        let key = AlarmKey {
            target: target.to_string(),
            metric,
        };
        let cells = self.cells.read().unwrap();
        let cell = cells.get(&key)?.lock().unwrap();
        Some(AlarmStatus {
            state: cell.state,
            last_transition: cell.last_transition,
            breach_streak: cell.breach_streak,
            clear_streak: cell.clear_streak,
        })
    }

    /// Drop alarm state for targets no longer in the configured set; a
    /// removed target stops being evaluated as of the cycle boundary.
    pub fn retain_targets(&self, live: &HashSet<String>) {
        let mut cells = self.cells.write().unwrap();
        cells.retain(|key, _| live.contains(&key.target));
    }

    /// Replace the policy for one metric, resetting all of its alarms to
    /// INSUFFICIENT_DATA. The only occasion alarm state is discarded.
    pub fn reconfigure(&self, metric: MetricName, policy: AlarmPolicy) {
        let mut policies = self.policies.write().unwrap();
        let mut cells = self.cells.write().unwrap();
        match metric {
            MetricName::Availability => policies.availability = policy,
            MetricName::Latency => policies.latency = policy,
        }
        // New cells pick up the policy lazily on the next datapoint.
        cells.retain(|key, _| key.metric != metric);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::Comparator;

    fn availability_point(value: f64) -> Datapoint {
        Datapoint {
            target: "https://example.com".to_string(),
            metric: MetricName::Availability,
            time: Utc::now(),
            value,
        }
    }

    fn latency_point(value: f64) -> Datapoint {
        Datapoint {
            target: "https://example.com".to_string(),
            metric: MetricName::Latency,
            time: Utc::now(),
            value,
        }
    }

    fn evaluator() -> AlarmEvaluator {
        AlarmEvaluator::new(AlarmPolicies::default())
    }

    #[test]
    fn test_initial_state_is_insufficient_data() {
        let eval = evaluator();
        assert_eq!(eval.status("https://example.com", MetricName::Availability), None);

        // B=3 latency policy: first datapoint is not enough to classify.
        assert_eq!(eval.evaluate(&latency_point(10.0)), None);
        let status = eval.status("https://example.com", MetricName::Latency).unwrap();
        assert_eq!(status.state, AlarmState::InsufficientData);
    }

    #[test]
    fn test_b1_failed_sample_fires_immediately() {
        let eval = evaluator();

        // Availability policy is B=1, "< 1.0": a single down cycle fires.
        let event = eval.evaluate(&availability_point(0.0)).unwrap();
        assert_eq!(event.previous, AlarmState::InsufficientData);
        assert_eq!(event.new_state, AlarmState::Alarm);
        assert_eq!(event.value, 0.0);
    }

    #[test]
    fn test_b1_healthy_sample_settles_to_ok() {
        let eval = evaluator();

        let event = eval.evaluate(&availability_point(1.0)).unwrap();
        assert_eq!(event.previous, AlarmState::InsufficientData);
        assert_eq!(event.new_state, AlarmState::Ok);
    }

    #[test]
    fn test_b3_streak_reset_by_non_breach() {
        let eval = evaluator();

        // Two breaches, one recovery, two more breaches: never enough
        // consecutive breaches to fire under B=3.
        let mut events = Vec::new();
        for value in [2000.0, 2000.0, 100.0, 2000.0, 2000.0] {
            if let Some(e) = eval.evaluate(&latency_point(value)) {
                events.push(e);
            }
        }

        // Only the initial INSUFFICIENT_DATA -> OK transition.
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].new_state, AlarmState::Ok);
        let status = eval.status("https://example.com", MetricName::Latency).unwrap();
        assert_eq!(status.state, AlarmState::Ok);
        assert_eq!(status.breach_streak, 2);
    }

    #[test]
    fn test_b3_fires_after_three_consecutive_breaches() {
        let eval = evaluator();

        let mut events = Vec::new();
        for value in [2000.0, 2000.0, 2000.0] {
            if let Some(e) = eval.evaluate(&latency_point(value)) {
                events.push(e);
            }
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].previous, AlarmState::InsufficientData);
        assert_eq!(events[0].new_state, AlarmState::Alarm);
    }

    #[test]
    fn test_recovery_asymmetry_single_non_breach_clears() {
        let eval = evaluator();

        for value in [2000.0, 2000.0, 2000.0] {
            eval.evaluate(&latency_point(value));
        }
        let status = eval.status("https://example.com", MetricName::Latency).unwrap();
        assert_eq!(status.state, AlarmState::Alarm);

        // One fast response clears despite B=3.
        let event = eval.evaluate(&latency_point(50.0)).unwrap();
        assert_eq!(event.previous, AlarmState::Alarm);
        assert_eq!(event.new_state, AlarmState::Ok);
    }

    #[test]
    fn test_no_duplicate_events_when_state_unchanged() {
        let eval = evaluator();

        let mut events = 0;
        for _ in 0..10 {
            if eval.evaluate(&availability_point(0.0)).is_some() {
                events += 1;
            }
        }

        // One INSUFFICIENT_DATA -> ALARM transition, then ALARM -> ALARM
        // forever: no re-notification storm.
        assert_eq!(events, 1);
    }

    #[test]
    fn test_replay_yields_identical_event_sequence() {
        let sequence = [1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0];

        let run = || {
            let eval = evaluator();
            sequence
                .iter()
                .filter_map(|v| eval.evaluate(&availability_point(*v)))
                .map(|e| (e.previous, e.new_state, e.value))
                .collect::<Vec<_>>()
        };

        let first = run();
        let second = run();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_targets_evaluate_independently() {
        let eval = evaluator();

        let down = Datapoint {
            target: "https://a.example.com".to_string(),
            metric: MetricName::Availability,
            time: Utc::now(),
            value: 0.0,
        };
        let up = Datapoint {
            target: "https://b.example.com".to_string(),
            metric: MetricName::Availability,
            time: Utc::now(),
            value: 1.0,
        };

        let down_event = eval.evaluate(&down).unwrap();
        let up_event = eval.evaluate(&up).unwrap();
        assert_eq!(down_event.new_state, AlarmState::Alarm);
        assert_eq!(up_event.new_state, AlarmState::Ok);
    }

    #[test]
    fn test_retain_targets_drops_removed_state() {
        let eval = evaluator();
        eval.evaluate(&availability_point(1.0));
        assert!(eval.status("https://example.com", MetricName::Availability).is_some());

        eval.retain_targets(&HashSet::new());
        assert_eq!(eval.status("https://example.com", MetricName::Availability), None);
    }

    #[test]
    fn test_reconfigure_resets_state_for_that_metric_only() {
        let eval = evaluator();
        eval.evaluate(&availability_point(1.0));
        eval.evaluate(&latency_point(100.0));

        eval.reconfigure(
            MetricName::Latency,
            AlarmPolicy {
                comparator: Comparator::GreaterThan,
                threshold: 500.0,
                window: 4,
                breach_count: 2,
            },
        );

        assert_eq!(eval.status("https://example.com", MetricName::Latency), None);
        assert!(eval.status("https://example.com", MetricName::Availability).is_some());

        // Next latency datapoint evaluates under the new policy.
        assert_eq!(eval.evaluate(&latency_point(600.0)), None);
        let status = eval.status("https://example.com", MetricName::Latency).unwrap();
        assert_eq!(status.state, AlarmState::InsufficientData);
        assert_eq!(status.breach_streak, 1);
    }

    #[test]
    fn test_window_trimmed_to_policy_size() {
        let eval = AlarmEvaluator::new(AlarmPolicies {
            availability: AlarmPolicy {
                comparator: Comparator::LessThan,
                threshold: 1.0,
                window: 3,
                breach_count: 2,
            },
            latency: AlarmPolicies::default().latency,
        });

        for _ in 0..100 {
            eval.evaluate(&availability_point(1.0));
        }
        let cells = eval.cells.read().unwrap();
        let cell = cells.values().next().unwrap().lock().unwrap();
        assert_eq!(cell.window.len(), 3);
    }
}
