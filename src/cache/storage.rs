//! SQLite implementation of the partition store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{CachedResponse, PartitionStore};
use crate::http::Response;

/// SQLite-based partition store.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for partition tables.
const CACHE_SCHEMA: &str = r#"
-- Partition registry; rowid gives creation order
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored response snapshots
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(key_hash);
"#;

const SELECT_ENTRY: &str = "SELECT e.partition, e.status, e.status_text, e.headers, e.body, e.cached_at
   FROM entries e";

/// Raw entry row before headers and timestamp are decoded.
type EntryRow = (String, u16, String, String, Vec<u8>, String);

impl PartitionStore for SqliteStorage {
  fn open(&self, partition: &str) -> Result<()> {
    self
      .lock()?
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;

    Ok(())
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, partition: &str) -> Result<bool> {
    let conn = self.lock()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = conn
      .execute("DELETE FROM entries WHERE partition = ?", params![partition])
      .and_then(|_| conn.execute("DELETE FROM partitions WHERE name = ?", params![partition]));

    match result {
      Ok(deleted) => {
        conn
          .execute("COMMIT", [])
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(deleted > 0)
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(eyre!("Failed to delete partition {}: {}", partition, e))
      }
    }
  }

  fn put(&self, partition: &str, key: &str, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO entries (partition, key_hash, url, status, status_text, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          partition,
          hash_key(key),
          key,
          response.status,
          response.status_text,
          headers,
          response.body
        ],
      )
      .map_err(|e| eyre!("Failed to store {} in {}: {}", key, partition, e))?;

    Ok(())
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row: Option<EntryRow> = conn
      .query_row(
        &format!("{} WHERE e.partition = ? AND e.key_hash = ?", SELECT_ENTRY),
        params![partition, hash_key(key)],
        read_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key, partition, e))?;

    row.map(decode_row).transpose()
  }

  fn match_any(&self, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row: Option<EntryRow> = conn
      .query_row(
        &format!(
          "{} INNER JOIN partitions p ON p.name = e.partition
           WHERE e.key_hash = ?
           ORDER BY p.rowid
           LIMIT 1",
          SELECT_ENTRY
        ),
        params![hash_key(key)],
        read_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    row.map(decode_row).transpose()
  }

  fn entry_count(&self, partition: &str) -> Result<usize> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE partition = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries in {}: {}", partition, e))?;

    Ok(count as usize)
  }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
  ))
}

fn decode_row(row: EntryRow) -> Result<CachedResponse> {
  let (partition, status, status_text, headers, body, cached_at) = row;
  let headers: Vec<(String, String)> =
    serde_json::from_str(&headers).map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

  Ok(CachedResponse {
    partition,
    response: Response {
      status,
      status_text,
      headers,
      body,
    },
    cached_at: parse_datetime(&cached_at)?,
  })
}

/// SHA256 of the request key, for stable fixed-length primary keys.
fn hash_key(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  const KEY: &str = "http://localhost:3000/dashboard";

  #[test]
  fn test_put_then_get() {
    let store = SqliteStorage::open_in_memory().unwrap();
    let resp = Response::new(200, "<html>dash</html>").with_header("Content-Type", "text/html");

    store.put("pages-cache", KEY, &resp).unwrap();

    let cached = store.get("pages-cache", KEY).unwrap().unwrap();
    assert_eq!(cached.partition, "pages-cache");
    assert_eq!(cached.response, resp);
    assert!(store.get("api-cache", KEY).unwrap().is_none());
  }

  #[test]
  fn test_put_overwrites_same_key() {
    let store = SqliteStorage::open_in_memory().unwrap();
    store.put("pages-cache", KEY, &Response::new(200, "old")).unwrap();
    store.put("pages-cache", KEY, &Response::new(200, "new")).unwrap();

    assert_eq!(store.entry_count("pages-cache").unwrap(), 1);
    let cached = store.get("pages-cache", KEY).unwrap().unwrap();
    assert_eq!(cached.response.text(), "new");
  }

  #[test]
  fn test_put_creates_partition_lazily() {
    let store = SqliteStorage::open_in_memory().unwrap();
    assert!(store.partitions().unwrap().is_empty());

    store.put("static-cache", KEY, &Response::new(200, "x")).unwrap();
    assert_eq!(store.partitions().unwrap(), vec!["static-cache".to_string()]);
  }

  #[test]
  fn test_match_any_prefers_oldest_partition() {
    let store = SqliteStorage::open_in_memory().unwrap();
    store.open("offline-app-v2").unwrap();
    store.put("pages-cache", KEY, &Response::new(200, "pages")).unwrap();
    store.put("offline-app-v2", KEY, &Response::new(200, "precache")).unwrap();

    let cached = store.match_any(KEY).unwrap().unwrap();
    assert_eq!(cached.partition, "offline-app-v2");
    assert_eq!(cached.response.text(), "precache");
    assert!(store.match_any("http://localhost:3000/other").unwrap().is_none());
  }

  #[test]
  fn test_delete_removes_entries() {
    let store = SqliteStorage::open_in_memory().unwrap();
    store.put("offline-app-v1", KEY, &Response::new(200, "x")).unwrap();

    assert!(store.delete("offline-app-v1").unwrap());
    assert!(!store.delete("offline-app-v1").unwrap());
    assert_eq!(store.entry_count("offline-app-v1").unwrap(), 0);
    assert!(store.match_any(KEY).unwrap().is_none());
    assert!(store.partitions().unwrap().is_empty());
  }

  #[test]
  fn test_open_on_disk() {
    let dir = std::env::temp_dir().join(format!("swcache-test-{}", std::process::id()));
    let path = dir.join("cache.db");

    {
      let store = SqliteStorage::open(&path).unwrap();
      store.put("api-cache", KEY, &Response::new(200, "[]")).unwrap();
    }

    let store = SqliteStorage::open(&path).unwrap();
    assert_eq!(store.entry_count("api-cache").unwrap(), 1);

    let _ = std::fs::remove_dir_all(&dir);
  }
}
