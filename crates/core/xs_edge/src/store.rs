//! The local event log.
//!
//! Both the data bus and the rules engine record through the [`EventStore`]
//! seam, so tests can observe writes without a database on disk.

use rusqlite::params;
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use time::OffsetDateTime;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// One row of the local event log.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub ts: f64,
    pub rule: String,
    pub data: String,
}

/// Where bus events and rule firings are recorded.
pub trait EventStore: Send + Sync {
    fn insert_event(&self, rule: &str, data: &Value) -> Result<(), StoreError>;

    /// The most recent events, newest first.
    fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>, StoreError>;
}

/// The embedded store is a single-writer database: all access is serialized
/// behind one connection.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS events(ts REAL, rule TEXT, data TEXT)",
            [],
        )?;
        Ok(SqliteEventStore {
            conn: Mutex::new(conn),
        })
    }
}

impl EventStore for SqliteEventStore {
    fn insert_event(&self, rule: &str, data: &Value) -> Result<(), StoreError> {
        let ts = unix_now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO events VALUES(?1, ?2, ?3)",
            params![ts, rule, data.to_string()],
        )?;
        Ok(())
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut statement =
            conn.prepare("SELECT ts, rule, data FROM events ORDER BY ts DESC LIMIT ?1")?;
        let rows = statement.query_map(params![limit as i64], |row| {
            Ok(EventRecord {
                ts: row.get(0)?,
                rule: row.get(1)?,
                data: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn unix_now() -> f64 {
    let now = OffsetDateTime::now_utc();
    now.unix_timestamp_nanos() as f64 / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_are_recorded_and_read_back() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        store
            .insert_event("HighLatency", &json!({"network_latency": 200}))
            .unwrap();
        store
            .insert_event("LowEnergy", &json!({"energy_level": 10}))
            .unwrap();

        let events = store.recent_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].rule, "LowEnergy");
        assert_eq!(events[1].rule, "HighLatency");
    }

    #[test]
    fn recent_events_honors_the_limit() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        for i in 0..5 {
            store.insert_event("rule", &json!({ "i": i })).unwrap();
        }
        assert_eq!(store.recent_events(3).unwrap().len(), 3);
    }
}
