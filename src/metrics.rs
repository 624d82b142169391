//! Sample aggregation into availability and latency metrics.
//!
//! One sample becomes one or two datapoints: availability always, latency
//! only when the probe succeeded. Availability is computed purely from the
//! success boolean so a fast connection refusal still registers as "down".

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::probe::Sample;

/// The two canonical metrics derived from a probe sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricName {
    Availability,
    Latency,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Availability => "Availability",
            MetricName::Latency => "Latency",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Availability" => Some(MetricName::Availability),
            "Latency" => Some(MetricName::Latency),
            _ => None,
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One time-series point: (target, metric, timestamp, value).
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    pub target: String,
    pub metric: MetricName,
    pub time: DateTime<Utc>,
    pub value: f64,
}

/// Metric sink error types.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("metric sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for published datapoints. Best-effort: a failed publish is
/// logged and never blocks alarm evaluation.
pub trait MetricSink: Send + Sync {
    fn publish(&self, datapoint: &Datapoint) -> Result<(), SinkError>;
}

/// Sink that emits datapoints as structured log events.
pub struct LogMetricSink;

impl MetricSink for LogMetricSink {
    fn publish(&self, datapoint: &Datapoint) -> Result<(), SinkError> {
        tracing::debug!(
            target_url = %datapoint.target,
            metric = %datapoint.metric,
            value = datapoint.value,
            "metric"
        );
        Ok(())
    }
}

/// In-memory sink collecting everything published, for tests.
#[derive(Default)]
pub struct MemoryMetricSink {
    points: Mutex<Vec<Datapoint>>,
}

impl MemoryMetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> Vec<Datapoint> {
        self.points.lock().unwrap().clone()
    }
}

impl MetricSink for MemoryMetricSink {
    fn publish(&self, datapoint: &Datapoint) -> Result<(), SinkError> {
        self.points.lock().unwrap().push(datapoint.clone());
        Ok(())
    }
}

/// Converts raw samples into metric datapoints and forwards them to a sink.
#[derive(Clone)]
pub struct Aggregator {
    sink: std::sync::Arc<dyn MetricSink>,
}

impl Aggregator {
    pub fn new(sink: std::sync::Arc<dyn MetricSink>) -> Self {
        Self { sink }
    }

    /// Derive datapoints from one sample and publish them.
    ///
    /// The datapoints are also returned so the evaluator consumes them
    /// in-memory; metric-sink unavailability never disables alarming.
    pub fn record(&self, sample: &Sample) -> Vec<Datapoint> {
        let mut points = vec![Datapoint {
            target: sample.target.clone(),
            metric: MetricName::Availability,
            time: sample.time,
            value: if sample.success { 1.0 } else { 0.0 },
        }];

        if sample.success {
            if let Some(latency_ms) = sample.latency_ms {
                points.push(Datapoint {
                    target: sample.target.clone(),
                    metric: MetricName::Latency,
                    time: sample.time,
                    value: latency_ms,
                });
            }
        }

        for point in &points {
            if let Err(e) = self.sink.publish(point) {
                tracing::warn!("Failed to publish {} for {}: {}", point.metric, point.target, e);
            }
        }

        points
    }
}
