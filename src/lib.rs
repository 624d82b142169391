//! WebCanary - website health monitoring pipeline.
//!
//! Periodically probes a set of websites, derives availability and latency
//! metrics, evaluates alarm thresholds over recent datapoints, and records
//! every alarm transition as a durable audit event.

pub mod alarm;
pub mod audit;
pub mod config;
pub mod db;
pub mod metrics;
pub mod probe;
pub mod scheduler;

pub use alarm::{AlarmEvaluator, AlarmEvent, AlarmPolicies, AlarmPolicy, AlarmState, Comparator};
pub use audit::{AuditLogger, EventStore, MemoryEventStore, OpsError};
pub use config::{CanaryConfig, FileTargetSource, StaticTargets, Target, TargetSource};
pub use db::SqliteEventStore;
pub use metrics::{Aggregator, Datapoint, LogMetricSink, MemoryMetricSink, MetricName, MetricSink};
pub use probe::{FailureReason, HttpProber, Prober, Sample};
pub use scheduler::{CycleSummary, Scheduler};
