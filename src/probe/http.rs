//! HTTP probe implementation backed by reqwest.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use super::{FailureReason, Prober, Sample};
use crate::config::Target;

/// HTTP prober sharing one client across all targets.
///
/// Success means the response status is in the target's accepted set and the
/// full body arrived within the target's deadline. Latency covers the
/// complete transfer, not just the first byte.
pub struct HttpProber {
    client: reqwest::Client,
    /// Upper bound on the random start delay applied per probe.
    jitter: Duration,
}

impl HttpProber {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent("webcanary/0.1")
            .build()?;
        Ok(Self {
            client,
            jitter: Duration::from_millis(100),
        })
    }

    /// Disable the start jitter (used by tests for deterministic timing).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = Duration::ZERO;
        self
    }

    /// Random start delay for one probe, capped at a tenth of the target's
    /// deadline so a tight timeout never spends its budget on jitter.
    fn jitter_delay(&self, target: &Target) -> Duration {
        let cap = self.jitter.min(target.timeout / 10);
        if cap.is_zero() {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::random::<u64>() % cap.as_millis().max(1) as u64)
    }

    fn classify(error: reqwest::Error, timeout: Duration) -> FailureReason {
        if error.is_timeout() {
            FailureReason::Timeout(timeout)
        } else {
            // DNS and TLS failures surface through the connect path.
            FailureReason::Connection(error.to_string())
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn check(&self, target: &Target) -> Sample {
        // Spread probe starts to avoid a thundering herd across many targets.
        let delay = self.jitter_delay(target);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let time = Utc::now();
        let start = Instant::now();

        let response = match self
            .client
            .get(&target.url)
            .timeout(target.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let reason = Self::classify(e, target.timeout);
                tracing::debug!("Probe failed for {}: {}", target.name, reason);
                return Sample::failed(target, time, reason);
            }
        };

        let status = response.status().as_u16();

        // Read the full body so latency reflects the complete transfer.
        if let Err(e) = response.bytes().await {
            let reason = Self::classify(e, target.timeout);
            tracing::debug!("Probe body read failed for {}: {}", target.name, reason);
            return Sample::failed(target, time, reason);
        }

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        if target.expected_statuses.contains(&status) {
            Sample::ok(target, time, latency_ms)
        } else {
            tracing::debug!("Probe got status {} for {}", status, target.name);
            Sample::failed(target, time, FailureReason::UnexpectedStatus(status))
        }
    }
}
