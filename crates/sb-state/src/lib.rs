//! Durable key-value state for scriptbus
//!
//! State is partitioned into namespaces: one per automation id (private
//! state) plus the reserved `"global"` namespace shared by all automations.
//! Each operation is a single SQLite statement, so writes are atomic per
//! key without any multi-key transaction machinery.
//!
//! Storage failures degrade instead of propagating: a failed read behaves
//! like an absent key and a failed write reports `false`, so one I/O hiccup
//! never crashes an automation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// The reserved shared namespace every automation may read.
pub const GLOBAL_NAMESPACE: &str = "global";

/// Errors opening the backing database.
#[derive(Debug, Error)]
pub enum StateError {
    /// The database file could not be opened or initialised.
    #[error("failed to open state database: {0}")]
    Open(#[from] rusqlite::Error),
}

/// Durable namespaced key-value store backed by SQLite.
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open (creating if necessary) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a transient in-memory store. Used by tests.
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StateError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                namespace  TEXT NOT NULL,
                key        TEXT NOT NULL,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (namespace, key)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Read a value, or `None` when absent (or on storage failure).
    pub fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let conn = self.conn.lock().ok()?;
        let row = conn
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get::<_, String>(0),
            )
            .optional();

        match row {
            Ok(Some(text)) => match serde_json::from_str(&text) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(namespace, key, %err, "stored state is not valid JSON");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(namespace, key, %err, "state read failed");
                None
            }
        }
    }

    /// Write a value. Returns `false` on storage failure.
    pub fn set(&self, namespace: &str, key: &str, value: &Value) -> bool {
        let text = match serde_json::to_string(value) {
            Ok(text) => text,
            Err(err) => {
                warn!(namespace, key, %err, "state value is not serialisable");
                return false;
            }
        };
        let Ok(conn) = self.conn.lock() else {
            return false;
        };
        let result = conn.execute(
            "INSERT INTO kv (namespace, key, value, updated_at)
             VALUES (?1, ?2, ?3, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
             ON CONFLICT (namespace, key)
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![namespace, key, text],
        );
        match result {
            Ok(_) => {
                debug!(namespace, key, "state set");
                true
            }
            Err(err) => {
                warn!(namespace, key, %err, "state write failed");
                false
            }
        }
    }

    /// Remove a key. Returns `false` on storage failure; removing an absent
    /// key succeeds.
    pub fn clear(&self, namespace: &str, key: &str) -> bool {
        let Ok(conn) = self.conn.lock() else {
            return false;
        };
        match conn.execute(
            "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        ) {
            Ok(_) => true,
            Err(err) => {
                warn!(namespace, key, %err, "state clear failed");
                false
            }
        }
    }

    /// All key-value pairs in a namespace, sorted by key.
    pub fn entries(&self, namespace: &str) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        let Ok(conn) = self.conn.lock() else {
            return out;
        };
        let mut stmt = match conn.prepare("SELECT key, value FROM kv WHERE namespace = ?1") {
            Ok(stmt) => stmt,
            Err(err) => {
                warn!(namespace, %err, "state enumeration failed");
                return out;
            }
        };
        let rows = stmt.query_map(params![namespace], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        });
        if let Ok(rows) = rows {
            for row in rows.flatten() {
                if let Ok(value) = serde_json::from_str(&row.1) {
                    out.insert(row.0, value);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_absent_key() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.get("motion", "last_seen"), None);
    }

    #[test]
    fn test_set_then_get() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.set("motion", "last_seen", &json!(1720000000)));
        assert_eq!(store.get("motion", "last_seen"), Some(json!(1720000000)));
    }

    #[test]
    fn test_set_overwrites() {
        let store = StateStore::open_in_memory().unwrap();
        store.set("motion", "mode", &json!("day"));
        store.set("motion", "mode", &json!("night"));
        assert_eq!(store.get("motion", "mode"), Some(json!("night")));
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let store = StateStore::open_in_memory().unwrap();
        store.set("a", "key", &json!(1));
        store.set("b", "key", &json!(2));
        store.set(GLOBAL_NAMESPACE, "key", &json!(3));
        assert_eq!(store.get("a", "key"), Some(json!(1)));
        assert_eq!(store.get("b", "key"), Some(json!(2)));
        assert_eq!(store.get(GLOBAL_NAMESPACE, "key"), Some(json!(3)));
    }

    #[test]
    fn test_clear_removes_key() {
        let store = StateStore::open_in_memory().unwrap();
        store.set("a", "key", &json!("value"));
        assert!(store.clear("a", "key"));
        assert_eq!(store.get("a", "key"), None);
        // Clearing an absent key still succeeds.
        assert!(store.clear("a", "key"));
    }

    #[test]
    fn test_structured_values_roundtrip() {
        let store = StateStore::open_in_memory().unwrap();
        let value = json!({"zones": ["kitchen", "hall"], "target": 21.5, "on": true});
        store.set("climate", "config", &value);
        assert_eq!(store.get("climate", "config"), Some(value));
    }

    #[test]
    fn test_entries_lists_namespace() {
        let store = StateStore::open_in_memory().unwrap();
        store.set(GLOBAL_NAMESPACE, "b", &json!(2));
        store.set(GLOBAL_NAMESPACE, "a", &json!(1));
        store.set("private", "c", &json!(3));

        let entries = store.entries(GLOBAL_NAMESPACE);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["a"], json!(1));
        assert_eq!(entries["b"], json!(2));
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let store = StateStore::open(&path).unwrap();
            store.set("motion", "count", &json!(5));
        }
        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.get("motion", "count"), Some(json!(5)));
    }
}
