//! Probe module: one health check against one target.
//!
//! A probe never propagates a fault past its boundary. Every failure mode
//! (timeout, connection error, unexpected status) is represented as a failed
//! [`Sample`] so a single unreachable target cannot abort the cycle for the
//! rest of the target set.

mod http;

pub use http::*;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::Target;

/// Why a probe failed to produce a successful response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FailureReason {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),
}

/// Outcome of one probe invocation. Ephemeral, consumed by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Target identifier (the probed URL).
    pub target: String,
    pub time: DateTime<Utc>,
    pub success: bool,
    /// Elapsed wall time in milliseconds; absent when the probe failed
    /// before a response arrived.
    pub latency_ms: Option<f64>,
    pub failure: Option<FailureReason>,
}

impl Sample {
    /// A successful check with measured latency.
    pub fn ok(target: &Target, time: DateTime<Utc>, latency_ms: f64) -> Self {
        Self {
            target: target.url.clone(),
            time,
            success: true,
            latency_ms: Some(latency_ms),
            failure: None,
        }
    }

    /// A failed check with the specific cause.
    pub fn failed(target: &Target, time: DateTime<Utc>, reason: FailureReason) -> Self {
        Self {
            target: target.url.clone(),
            time,
            success: false,
            latency_ms: None,
            failure: Some(reason),
        }
    }

    /// A check abandoned by the scheduler at its hard deadline.
    pub fn timed_out(target: &Target, time: DateTime<Utc>, deadline: Duration) -> Self {
        Self::failed(target, time, FailureReason::Timeout(deadline))
    }
}

/// One health check against one target.
///
/// Implementations perform no internal retries; retry policy belongs to the
/// scheduler. Checks are idempotent from the caller's perspective.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn check(&self, target: &Target) -> Sample;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_sample_has_no_latency() {
        let target = Target::from_url("https://example.com");
        let sample = Sample::failed(
            &target,
            Utc::now(),
            FailureReason::Connection("refused".to_string()),
        );

        assert!(!sample.success);
        assert_eq!(sample.latency_ms, None);
        assert_eq!(sample.target, "https://example.com");
    }

    #[test]
    fn test_failure_reason_display() {
        let reason = FailureReason::UnexpectedStatus(503);
        assert_eq!(reason.to_string(), "unexpected status code: 503");
    }
}
