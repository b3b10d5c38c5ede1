//! The controller's relational store.
//!
//! Four tables mirror the data model: `edges` (upserted on register),
//! `telemetry` (append-only), `command_log` (acked exactly once) and
//! `rulesets` (append-only audit of pushes). The embedded database is a
//! single-writer store: all access is serialized behind one connection.

use rusqlite::params;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use xs_api::now_rfc3339;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeRecord {
    pub edge_id: String,
    pub version: String,
    pub last_seen: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryRecord {
    pub edge_id: String,
    pub topic: String,
    pub data: String,
    pub ts: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLogEntry {
    pub cmd_id: String,
    pub edge_id: String,
    pub command: String,
    pub status: String,
    pub result: Option<String>,
    pub ts_sent: String,
    pub ts_ack: Option<String>,
}

pub struct ControllerStore {
    conn: Mutex<Connection>,
}

impl ControllerStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS edges(
                edge_id TEXT PRIMARY KEY,
                version TEXT,
                last_seen TEXT,
                status TEXT
            );
            CREATE TABLE IF NOT EXISTS telemetry(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                edge_id TEXT,
                topic TEXT,
                data TEXT,
                ts TEXT
            );
            CREATE TABLE IF NOT EXISTS command_log(
                cmd_id TEXT PRIMARY KEY,
                edge_id TEXT,
                command TEXT,
                status TEXT,
                result TEXT,
                ts_sent TEXT,
                ts_ack TEXT
            );
            CREATE TABLE IF NOT EXISTS rulesets(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                edge_id TEXT,
                rules TEXT,
                ts_uploaded TEXT
            );",
        )?;
        Ok(ControllerStore {
            conn: Mutex::new(conn),
        })
    }

    /// Create or refresh an edge record: status `ONLINE`, `last_seen` now.
    pub fn upsert_edge(&self, edge_id: &str, version: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO edges(edge_id, version, last_seen, status)
             VALUES(?1, ?2, ?3, 'ONLINE')
             ON CONFLICT(edge_id) DO UPDATE SET
                 version = excluded.version,
                 last_seen = excluded.last_seen,
                 status = 'ONLINE'",
            params![edge_id, version, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list_edges(&self) -> Result<Vec<EdgeRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut statement =
            conn.prepare("SELECT edge_id, version, last_seen, status FROM edges")?;
        let rows = statement.query_map([], |row| {
            Ok(EdgeRecord {
                edge_id: row.get(0)?,
                version: row.get(1)?,
                last_seen: row.get(2)?,
                status: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn insert_telemetry(&self, edge_id: &str, topic: &str, data: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO telemetry(edge_id, topic, data, ts) VALUES(?1, ?2, ?3, ?4)",
            params![edge_id, topic, data, now_rfc3339()],
        )?;
        Ok(())
    }

    /// The most recent telemetry rows, newest first.
    pub fn latest_telemetry(&self, limit: usize) -> Result<Vec<TelemetryRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut statement = conn.prepare(
            "SELECT edge_id, topic, data, ts FROM telemetry ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = statement.query_map(params![limit as i64], |row| {
            Ok(TelemetryRecord {
                edge_id: row.get(0)?,
                topic: row.get(1)?,
                data: row.get(2)?,
                ts: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn insert_command(
        &self,
        cmd_id: &str,
        edge_id: &str,
        command: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO command_log(cmd_id, edge_id, command, status, ts_sent)
             VALUES(?1, ?2, ?3, 'SENT', ?4)",
            params![cmd_id, edge_id, command, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Transition a command `SENT` → `ACK`, recording the result and the
    /// ack timestamp. Returns `false` for unknown or already-acked
    /// commands; an entry is never acked twice and never goes back.
    pub fn ack_command(&self, cmd_id: &str, result: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE command_log SET status = 'ACK', result = ?2, ts_ack = ?3
             WHERE cmd_id = ?1 AND status = 'SENT'",
            params![cmd_id, result, now_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    pub fn command(&self, cmd_id: &str) -> Result<Option<CommandLogEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                "SELECT cmd_id, edge_id, command, status, result, ts_sent, ts_ack
                 FROM command_log WHERE cmd_id = ?1",
                params![cmd_id],
                |row| {
                    Ok(CommandLogEntry {
                        cmd_id: row.get(0)?,
                        edge_id: row.get(1)?,
                        command: row.get(2)?,
                        status: row.get(3)?,
                        result: row.get(4)?,
                        ts_sent: row.get(5)?,
                        ts_ack: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    pub fn insert_ruleset(&self, edge_id: &str, rules: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO rulesets(edge_id, rules, ts_uploaded) VALUES(?1, ?2, ?3)",
            params![edge_id, rules, now_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_upserts_the_edge_record() {
        let store = ControllerStore::open_in_memory().unwrap();

        store.upsert_edge("edge-A", "1.0.0").unwrap();
        store.upsert_edge("edge-A", "1.1.0").unwrap();
        store.upsert_edge("edge-B", "1.0.0").unwrap();

        let edges = store.list_edges().unwrap();
        assert_eq!(edges.len(), 2);
        let edge_a = edges.iter().find(|e| e.edge_id == "edge-A").unwrap();
        assert_eq!(edge_a.version, "1.1.0");
        assert_eq!(edge_a.status, "ONLINE");
    }

    #[test]
    fn telemetry_is_append_only_and_newest_first() {
        let store = ControllerStore::open_in_memory().unwrap();
        for n in 0..5 {
            store
                .insert_telemetry("edge-A", "network/metrics", &format!("{{\"n\": {n}}}"))
                .unwrap();
        }

        let rows = store.latest_telemetry(3).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].data, "{\"n\": 4}");
        assert_eq!(rows[2].data, "{\"n\": 2}");
    }

    #[test]
    fn a_command_is_acked_exactly_once() {
        let store = ControllerStore::open_in_memory().unwrap();
        store.insert_command("cmd-1", "edge-A", "{}").unwrap();

        assert!(store.ack_command("cmd-1", "Reloaded 2 rules").unwrap());
        // A second ack neither fails nor overwrites.
        assert!(!store.ack_command("cmd-1", "something else").unwrap());

        let entry = store.command("cmd-1").unwrap().unwrap();
        assert_eq!(entry.status, "ACK");
        assert_eq!(entry.result.as_deref(), Some("Reloaded 2 rules"));
        assert!(entry.ts_ack.is_some());
    }

    #[test]
    fn acking_an_unknown_command_is_a_no_op() {
        let store = ControllerStore::open_in_memory().unwrap();
        assert!(!store.ack_command("missing", "result").unwrap());
    }

    #[test]
    fn unacked_commands_stay_sent() {
        let store = ControllerStore::open_in_memory().unwrap();
        store.insert_command("cmd-2", "edge-A", "{}").unwrap();

        let entry = store.command("cmd-2").unwrap().unwrap();
        assert_eq!(entry.status, "SENT");
        assert_eq!(entry.result, None);
        assert_eq!(entry.ts_ack, None);
    }
}
