//! Alarm audit logging.
//!
//! Every alarm transition is appended to a durable event store. The logger
//! runs on its own task behind a channel so a slow store can never delay the
//! probe cycle. Appends retry with bounded exponential backoff; an event that
//! still cannot be written is escalated on the operational error channel,
//! never silently dropped into the void.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::alarm::AlarmEvent;

/// Event store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("event store unavailable: {0}")]
    Unavailable(String),
    #[error("append rejected: {0}")]
    Rejected(String),
}

/// Durable, append-only destination for alarm events.
///
/// The logger's retries give at-least-once semantics; duplicate detection,
/// if needed, is the store's responsibility.
pub trait EventStore: Send + Sync {
    fn append(&self, event: &AlarmEvent) -> Result<(), StoreError>;
}

/// In-memory event store, for tests.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<AlarmEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AlarmEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventStore for MemoryEventStore {
    fn append(&self, event: &AlarmEvent) -> Result<(), StoreError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Operational faults that need a human, distinct from alarm notifications.
#[derive(Error, Debug)]
pub enum OpsError {
    #[error("audit append failed for {target}/{metric} after {attempts} attempts: {last_error}")]
    AuditAppendFailed {
        target: String,
        metric: String,
        attempts: u32,
        last_error: String,
    },
}

/// Writes alarm events to the durable store with bounded retry.
pub struct AuditLogger {
    store: Arc<dyn EventStore>,
    ops_tx: mpsc::Sender<OpsError>,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn EventStore>, ops_tx: mpsc::Sender<OpsError>) -> Self {
        Self {
            store,
            ops_tx,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, initial_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.initial_backoff = initial_backoff;
        self
    }

    /// Start the logger task consuming events off the channel. The task
    /// exits when all senders are dropped, after draining what remains.
    pub fn spawn(self, mut rx: mpsc::Receiver<AlarmEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.append_with_retry(&event).await;
            }
        })
    }

    async fn append_with_retry(&self, event: &AlarmEvent) {
        let mut backoff = self.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.store.append(event) {
                Ok(()) => {
                    tracing::info!(
                        "Recorded {} -> {} for {}/{}",
                        event.previous,
                        event.new_state,
                        event.target,
                        event.metric
                    );
                    return;
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        "Audit append attempt {}/{} failed for {}: {}",
                        attempt,
                        self.max_attempts,
                        event.target,
                        e
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        // Losing an audit record is a more serious fault than losing a
        // metric point; escalate instead of discarding.
        tracing::error!(
            "Giving up on audit append for {}/{} after {} attempts",
            event.target,
            event.metric,
            self.max_attempts
        );
        let _ = self
            .ops_tx
            .send(OpsError::AuditAppendFailed {
                target: event.target.clone(),
                metric: event.metric.to_string(),
                attempts: self.max_attempts,
                last_error,
            })
            .await;
    }
}
