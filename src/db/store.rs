//! SQLite-backed alarm event store.
//!
//! Append-only: rows are inserted on alarm transitions and never updated or
//! deleted. This table is the system's source of truth for "what happened
//! and when" and survives process restarts.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult};
use thiserror::Error;

use crate::alarm::{AlarmEvent, AlarmState};
use crate::audit::{EventStore, StoreError};
use crate::metrics::MetricName;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alarm_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target TEXT NOT NULL,
    metric TEXT NOT NULL,
    previous_state TEXT NOT NULL,
    new_state TEXT NOT NULL,
    time TEXT NOT NULL,
    value REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alarm_events_target_metric_time
    ON alarm_events (target, metric, time);
";

/// Thread-safe SQLite event store.
#[derive(Clone)]
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    /// Open (or create) the database at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Append one alarm event and return its row id.
    pub fn append_event(&self, event: &AlarmEvent) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO alarm_events (target, metric, previous_state, new_state, time, value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.target,
                event.metric.as_str(),
                event.previous.as_str(),
                event.new_state.as_str(),
                event.time.to_rfc3339(),
                event.value,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent events across all targets, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<AlarmEvent>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT target, metric, previous_state, new_state, time, value
             FROM alarm_events ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_event)?
            .collect::<SqlResult<Vec<_>>>()?;
        rows.into_iter().collect()
    }

    /// Event history for one target, oldest first.
    pub fn events_for_target(&self, target: &str) -> Result<Vec<AlarmEvent>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT target, metric, previous_state, new_state, time, value
             FROM alarm_events WHERE target = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![target], row_to_event)?
            .collect::<SqlResult<Vec<_>>>()?;
        rows.into_iter().collect()
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> SqlResult<Result<AlarmEvent, DbError>> {
    let target: String = row.get(0)?;
    let metric: String = row.get(1)?;
    let previous: String = row.get(2)?;
    let new_state: String = row.get(3)?;
    let time: String = row.get(4)?;
    let value: f64 = row.get(5)?;

    Ok(build_event(target, metric, previous, new_state, time, value))
}

fn build_event(
    target: String,
    metric: String,
    previous: String,
    new_state: String,
    time: String,
    value: f64,
) -> Result<AlarmEvent, DbError> {
    let metric = MetricName::parse(&metric)
        .ok_or_else(|| DbError::CorruptRow(format!("unknown metric {metric}")))?;
    let previous = AlarmState::parse(&previous)
        .ok_or_else(|| DbError::CorruptRow(format!("unknown state {previous}")))?;
    let new_state = AlarmState::parse(&new_state)
        .ok_or_else(|| DbError::CorruptRow(format!("unknown state {new_state}")))?;
    let time = DateTime::parse_from_rfc3339(&time)
        .map_err(|e| DbError::CorruptRow(format!("bad timestamp {time}: {e}")))?
        .with_timezone(&Utc);

    Ok(AlarmEvent {
        target,
        metric,
        previous,
        new_state,
        time,
        value,
    })
}

impl EventStore for SqliteEventStore {
    fn append(&self, event: &AlarmEvent) -> Result<(), StoreError> {
        self.append_event(event)
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn event(value: f64, previous: AlarmState, new_state: AlarmState) -> AlarmEvent {
        AlarmEvent {
            target: "https://example.com".to_string(),
            metric: MetricName::Availability,
            previous,
            new_state,
            time: Utc::now(),
            value,
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let tmp = NamedTempFile::new().unwrap();
        let store = SqliteEventStore::new(tmp.path()).unwrap();

        let e = event(0.0, AlarmState::Ok, AlarmState::Alarm);
        let id = store.append_event(&e).unwrap();
        assert!(id > 0);

        let history = store.events_for_target("https://example.com").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous, AlarmState::Ok);
        assert_eq!(history[0].new_state, AlarmState::Alarm);
        assert_eq!(history[0].value, 0.0);
    }

    #[test]
    fn test_history_preserves_append_order() {
        let tmp = NamedTempFile::new().unwrap();
        let store = SqliteEventStore::new(tmp.path()).unwrap();

        store
            .append_event(&event(0.0, AlarmState::InsufficientData, AlarmState::Alarm))
            .unwrap();
        store
            .append_event(&event(1.0, AlarmState::Alarm, AlarmState::Ok))
            .unwrap();

        let history = store.events_for_target("https://example.com").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].new_state, AlarmState::Alarm);
        assert_eq!(history[1].new_state, AlarmState::Ok);

        let recent = store.recent_events(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].new_state, AlarmState::Ok);
    }

    #[test]
    fn test_events_survive_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let store = SqliteEventStore::new(tmp.path()).unwrap();
            store
                .append_event(&event(0.0, AlarmState::Ok, AlarmState::Alarm))
                .unwrap();
        }

        let reopened = SqliteEventStore::new(tmp.path()).unwrap();
        let history = reopened.events_for_target("https://example.com").unwrap();
        assert_eq!(history.len(), 1);
    }
}
