//! WebCanary - website health monitoring service.
//!
//! Probes the configured sites every cycle, publishes availability and
//! latency metrics, evaluates alarm thresholds, and records every alarm
//! transition in the SQLite audit log.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webcanary::config::{load_alarm_policies, CanaryConfig, FileTargetSource};
use webcanary::{
    Aggregator, AlarmEvaluator, AuditLogger, HttpProber, LogMetricSink, OpsError, Scheduler,
    SqliteEventStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("webcanary=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = CanaryConfig::load();
    tracing::info!(
        "Starting WebCanary: targets from {}, cycle every {:?}",
        cfg.targets_path.display(),
        cfg.interval
    );

    let policies = load_alarm_policies(&cfg.targets_path)?;
    let store = Arc::new(SqliteEventStore::new(&cfg.db_path)?);
    tracing::info!("Audit log at {}", cfg.db_path);

    // Audit pipeline: transitions flow through a channel into the logger
    // task; exhausted retries surface on the ops channel.
    let (event_tx, event_rx) = mpsc::channel(256);
    let (ops_tx, mut ops_rx) = mpsc::channel::<OpsError>(64);
    let logger_handle = AuditLogger::new(store, ops_tx).spawn(event_rx);

    tokio::spawn(async move {
        while let Some(err) = ops_rx.recv().await {
            tracing::error!("Operational fault: {}", err);
        }
    });

    let prober = Arc::new(HttpProber::new()?);
    let aggregator = Aggregator::new(Arc::new(LogMetricSink));
    let evaluator = Arc::new(AlarmEvaluator::new(policies));
    let source = Arc::new(FileTargetSource::new(&cfg.targets_path));

    let scheduler = Scheduler::new(
        source,
        prober,
        aggregator,
        evaluator,
        event_tx,
        cfg.interval,
        cfg.probe_concurrency,
    );

    // Stop cleanly on Ctrl-C, letting the in-flight cycle finish.
    let (stop_tx, stop_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = stop_tx.send(());
        }
    });

    scheduler.run(stop_rx).await;

    // Close the audit channel and wait for the logger to drain every queued
    // event, retries included, before exiting.
    drop(scheduler);
    logger_handle.await?;

    Ok(())
}
