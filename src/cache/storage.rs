//! Durable snapshot backends for the TTL cache.
//!
//! Persistence is best-effort: the in-memory store is the source of truth and
//! every error here is a `PersistenceError` that the cache logs and absorbs.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::store::CacheEntry;
use crate::error::PersistenceError;

/// Trait for snapshot storage backends.
pub trait SnapshotStorage: Send + Sync {
  /// Load the persisted snapshot. Entries are returned as written; the cache
  /// decides what is still valid.
  fn load(&self) -> Result<Vec<(String, CacheEntry)>, PersistenceError>;

  /// Replace the snapshot with the given entries.
  fn save(&self, entries: &[(String, CacheEntry)]) -> Result<(), PersistenceError>;

  /// Drop the persisted snapshot entirely.
  fn discard(&self) -> Result<(), PersistenceError>;
}

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl SnapshotStorage for NoopStorage {
  fn load(&self) -> Result<Vec<(String, CacheEntry)>, PersistenceError> {
    Ok(Vec::new()) // Nothing persisted
  }

  fn save(&self, _entries: &[(String, CacheEntry)]) -> Result<(), PersistenceError> {
    Ok(()) // Discard
  }

  fn discard(&self) -> Result<(), PersistenceError> {
    Ok(())
  }
}

/// SQLite-based snapshot storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for the snapshot table.
const SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_snapshot (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    written_at TEXT NOT NULL,
    ttl_ms INTEGER NOT NULL
);
"#;

impl SqliteStorage {
  /// Open the snapshot database at the default location.
  pub fn open() -> Result<Self, PersistenceError> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open the snapshot database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self, PersistenceError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf, PersistenceError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| PersistenceError::Other("Could not determine data directory".into()))?;

    Ok(data_dir.join("depot").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<(), PersistenceError> {
    let conn = self.lock()?;
    conn.execute_batch(SNAPSHOT_SCHEMA)?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, PersistenceError> {
    self
      .conn
      .lock()
      .map_err(|e| PersistenceError::Other(format!("Lock poisoned: {}", e)))
  }
}

impl SnapshotStorage for SqliteStorage {
  fn load(&self) -> Result<Vec<(String, CacheEntry)>, PersistenceError> {
    let conn = self.lock()?;

    let mut stmt = conn.prepare("SELECT key, value, written_at, ttl_ms FROM cache_snapshot")?;
    let rows = stmt.query_map([], |row| {
      let key: String = row.get(0)?;
      let value: Vec<u8> = row.get(1)?;
      let written_at: String = row.get(2)?;
      let ttl_ms: i64 = row.get(3)?;
      Ok((key, value, written_at, ttl_ms))
    })?;

    let mut entries = Vec::new();
    for row in rows {
      let (key, value, written_at, ttl_ms) = row?;
      let value: serde_json::Value = serde_json::from_slice(&value)?;
      let written_at = parse_datetime(&written_at)?;
      entries.push((
        key,
        CacheEntry {
          value,
          written_at,
          ttl: chrono::Duration::milliseconds(ttl_ms),
        },
      ));
    }

    Ok(entries)
  }

  fn save(&self, entries: &[(String, CacheEntry)]) -> Result<(), PersistenceError> {
    let conn = self.lock()?;

    conn.execute("BEGIN TRANSACTION", [])?;

    // The snapshot mirrors the whole in-memory store, so replace it wholesale.
    let result = (|| -> Result<(), PersistenceError> {
      conn.execute("DELETE FROM cache_snapshot", [])?;

      for (key, entry) in entries {
        let value = serde_json::to_vec(&entry.value)?;
        conn.execute(
          "INSERT OR REPLACE INTO cache_snapshot (key, value, written_at, ttl_ms)
           VALUES (?, ?, ?, ?)",
          params![
            key,
            value,
            entry.written_at.to_rfc3339(),
            entry.ttl.num_milliseconds()
          ],
        )?;
      }

      Ok(())
    })();

    match result {
      Ok(()) => {
        conn.execute("COMMIT", [])?;
        Ok(())
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(e)
      }
    }
  }

  fn discard(&self) -> Result<(), PersistenceError> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM cache_snapshot", [])?;
    Ok(())
  }
}

/// Parse an RFC 3339 timestamp as stored in the snapshot.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, PersistenceError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| PersistenceError::Other(format!("Failed to parse datetime '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn entry(value: serde_json::Value, ttl_ms: i64) -> CacheEntry {
    CacheEntry {
      value,
      written_at: Utc::now(),
      ttl: chrono::Duration::milliseconds(ttl_ms),
    }
  }

  #[test]
  fn save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open_at(&dir.path().join("cache.db")).unwrap();

    let entries = vec![
      ("a".to_string(), entry(json!({"items": [1, 2]}), 60_000)),
      ("b".to_string(), entry(json!("bare"), 1_000)),
    ];
    storage.save(&entries).unwrap();

    let mut loaded = storage.load().unwrap();
    loaded.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].0, "a");
    assert_eq!(loaded[0].1.value, json!({"items": [1, 2]}));
    assert_eq!(loaded[0].1.ttl, chrono::Duration::milliseconds(60_000));
    assert_eq!(loaded[1].1.value, json!("bare"));
  }

  #[test]
  fn save_replaces_previous_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open_at(&dir.path().join("cache.db")).unwrap();

    storage
      .save(&[("old".to_string(), entry(json!(1), 1000))])
      .unwrap();
    storage
      .save(&[("new".to_string(), entry(json!(2), 1000))])
      .unwrap();

    let loaded = storage.load().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].0, "new");
  }

  #[test]
  fn discard_empties_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open_at(&dir.path().join("cache.db")).unwrap();

    storage
      .save(&[("k".to_string(), entry(json!(1), 1000))])
      .unwrap();
    storage.discard().unwrap();

    assert!(storage.load().unwrap().is_empty());
  }

  #[test]
  fn noop_storage_never_returns_data() {
    let storage = NoopStorage;
    storage
      .save(&[("k".to_string(), entry(json!(1), 1000))])
      .unwrap();
    assert!(storage.load().unwrap().is_empty());
  }
}
