use crate::settings::KeyValueStore;
use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use std::rc::Rc;

pub use rusqlite::Connection;

pub const INCIDENTS_FEED: &str = "incidents";
pub const CAMERAS_FEED: &str = "cameras";

pub fn open(db_path: &str) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    init(&conn)?;
    Ok(conn)
}

fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS local_storage (
          name TEXT PRIMARY KEY,
          value TEXT NOT NULL,
          updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );

        CREATE TABLE IF NOT EXISTS feed_snapshots (
          feed TEXT PRIMARY KEY,
          fetched_at TEXT NOT NULL,
          raw_json TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

/// The local settings copy: one JSON blob per store name. The connection can
/// be shared with snapshot reads and writes.
pub struct LocalStorage {
    conn: Rc<Connection>,
}

impl LocalStorage {
    pub fn new(conn: impl Into<Rc<Connection>>) -> Self {
        Self { conn: conn.into() }
    }
}

impl KeyValueStore for LocalStorage {
    fn load(&self, name: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM local_storage WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn save(&self, name: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO local_storage (name, value)
            VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET
              value=excluded.value,
              updated_at=strftime('%Y-%m-%dT%H:%M:%fZ','now')
            "#,
            params![name, value],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub fetched_at: String,
    pub payload: Value,
}

/// Keeps the last good payload of a feed so offline commands can show it.
pub fn save_snapshot(conn: &Connection, feed: &str, fetched_at: &str, payload: &Value) -> Result<()> {
    let raw_json = serde_json::to_string(payload)?;
    conn.execute(
        r#"
        INSERT INTO feed_snapshots (feed, fetched_at, raw_json)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(feed) DO UPDATE SET
          fetched_at=excluded.fetched_at,
          raw_json=excluded.raw_json
        "#,
        params![feed, fetched_at, raw_json],
    )?;
    Ok(())
}

pub fn load_snapshot(conn: &Connection, feed: &str) -> Result<Option<Snapshot>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT fetched_at, raw_json FROM feed_snapshots WHERE feed = ?1",
            params![feed],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        Some((fetched_at, raw_json)) => Ok(Some(Snapshot {
            fetched_at,
            payload: serde_json::from_str(&raw_json)?,
        })),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ncdot.db");
        let conn = open(path.to_str().unwrap()).unwrap();
        (dir, conn)
    }

    #[test]
    fn local_storage_overwrites_by_name() {
        let (_dir, conn) = temp_db();
        let storage = LocalStorage::new(conn);
        assert_eq!(storage.load("settings").unwrap(), None);
        storage.save("settings", "{\"a\":1}").unwrap();
        storage.save("settings", "{\"a\":2}").unwrap();
        assert_eq!(storage.load("settings").unwrap().as_deref(), Some("{\"a\":2}"));
    }

    #[test]
    fn shared_connection_serves_settings_and_snapshots() {
        let (_dir, conn) = temp_db();
        let conn = Rc::new(conn);
        let storage = LocalStorage::new(Rc::clone(&conn));
        storage.save("settings", "{}").unwrap();
        save_snapshot(&conn, CAMERAS_FEED, "2024-01-01T10:00:00Z", &json!([])).unwrap();
        assert!(load_snapshot(&conn, CAMERAS_FEED).unwrap().is_some());
        assert_eq!(storage.load("settings").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn snapshots_keep_the_latest_payload() {
        let (_dir, conn) = temp_db();
        assert!(load_snapshot(&conn, INCIDENTS_FEED).unwrap().is_none());
        save_snapshot(&conn, INCIDENTS_FEED, "2024-01-01T10:00:00Z", &json!([{"id": 1}])).unwrap();
        save_snapshot(&conn, INCIDENTS_FEED, "2024-01-01T11:00:00Z", &json!([{"id": 2}])).unwrap();
        let snapshot = load_snapshot(&conn, INCIDENTS_FEED).unwrap().unwrap();
        assert_eq!(snapshot.fetched_at, "2024-01-01T11:00:00Z");
        assert_eq!(snapshot.payload, json!([{"id": 2}]));
    }
}
