//! Scheduler module: drives probe cycles on a fixed cadence.
//!
//! Each cycle reloads the target set, fans out one probe task per target
//! (bounded by a semaphore), and joins them all before the cycle counts as
//! complete. Cycles never overlap: an overrunning cycle is followed
//! immediately by the next one, so the evaluator's consecutive-breach
//! counting stays correct.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::alarm::{AlarmEvaluator, AlarmEvent};
use crate::config::{Target, TargetSource};
use crate::metrics::Aggregator;
use crate::probe::{Prober, Sample};

/// Outcome of one completed cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub targets: usize,
    pub failures: usize,
    pub transitions: usize,
    pub elapsed: Duration,
}

/// The main scheduler orchestrating probe -> aggregate -> evaluate -> log.
pub struct Scheduler {
    source: Arc<dyn TargetSource>,
    prober: Arc<dyn Prober>,
    aggregator: Aggregator,
    evaluator: Arc<AlarmEvaluator>,
    event_tx: mpsc::Sender<AlarmEvent>,
    interval: Duration,
    probe_concurrency: usize,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn TargetSource>,
        prober: Arc<dyn Prober>,
        aggregator: Aggregator,
        evaluator: Arc<AlarmEvaluator>,
        event_tx: mpsc::Sender<AlarmEvent>,
        interval: Duration,
        probe_concurrency: usize,
    ) -> Self {
        Self {
            source,
            prober,
            aggregator,
            evaluator,
            event_tx,
            interval,
            probe_concurrency: probe_concurrency.max(1),
        }
    }

    /// Run cycles on the configured cadence until the stop signal fires.
    pub async fn run(&self, mut stop_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.interval);
        // A missed tick fires immediately, so an overrunning cycle is
        // followed back to back by the next one, never run concurrently.
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    tracing::info!("Scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
            }
        }
    }

    /// Run one full cycle: reload targets, probe them all concurrently,
    /// feed datapoints through the evaluator, and hand transitions to the
    /// audit channel.
    pub async fn run_cycle(&self) -> CycleSummary {
        let started = tokio::time::Instant::now();

        let targets = match self.source.load() {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!("Failed to load target set, skipping cycle: {}", e);
                return CycleSummary::default();
            }
        };

        // Removed targets stop being evaluated as of this cycle.
        let live: HashSet<String> = targets.iter().map(|t| t.url.clone()).collect();
        self.evaluator.retain_targets(&live);

        let semaphore = Arc::new(Semaphore::new(self.probe_concurrency));
        let mut tasks = JoinSet::new();

        for target in &targets {
            let target = target.clone();
            let prober = self.prober.clone();
            let aggregator = self.aggregator.clone();
            let evaluator = self.evaluator.clone();
            let event_tx = self.event_tx.clone();
            let semaphore = semaphore.clone();
            let deadline = self.per_target_deadline(&target);

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (true, 0),
                };

                // An abandoned probe still yields a definite failed sample,
                // so downstream logic always sees an outcome.
                let sample = match tokio::time::timeout(deadline, prober.check(&target)).await {
                    Ok(sample) => sample,
                    Err(_) => Sample::timed_out(&target, Utc::now(), deadline),
                };

                let failed = !sample.success;
                let mut transitions = 0;

                for datapoint in aggregator.record(&sample) {
                    if let Some(event) = evaluator.evaluate(&datapoint) {
                        tracing::warn!(
                            "Alarm {}/{}: {} -> {} (value {})",
                            event.target,
                            event.metric,
                            event.previous,
                            event.new_state,
                            event.value
                        );
                        transitions += 1;
                        if event_tx.send(event).await.is_err() {
                            tracing::error!("Audit channel closed, transition not recorded");
                        }
                    }
                }

                (failed, transitions)
            });
        }

        let mut summary = CycleSummary {
            targets: targets.len(),
            ..Default::default()
        };

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok((failed, transitions)) => {
                    if failed {
                        summary.failures += 1;
                    }
                    summary.transitions += transitions;
                }
                Err(e) => {
                    tracing::error!("Probe task panicked: {}", e);
                }
            }
        }

        summary.elapsed = started.elapsed();
        tracing::info!(
            "Cycle complete: {} targets, {} failures, {} transitions in {:?}",
            summary.targets,
            summary.failures,
            summary.transitions,
            summary.elapsed
        );

        summary
    }

    /// Per-target hard deadline, kept strictly below the cycle interval so
    /// one hung target can never push a cycle past its slot.
    fn per_target_deadline(&self, target: &Target) -> Duration {
        let cap = self.interval.mul_f64(0.9);
        target.timeout.min(cap)
    }
}
