//! In-memory TTL cache with a durable snapshot mirror.
//!
//! Expiry is evaluated lazily at read time and capacity eviction piggybacks
//! on `set`, so there is no background sweeper. The in-memory store is the
//! source of truth; the snapshot is a best-effort mirror written after every
//! mutation.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::storage::SnapshotStorage;
use crate::error::PersistenceError;

/// A single cached value with its expiry window.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  /// The cached value, serialized so heterogeneous resources share one store
  pub value: serde_json::Value,
  /// When the value was written
  pub written_at: DateTime<Utc>,
  /// How long after `written_at` the value stays valid
  pub ttl: Duration,
}

impl CacheEntry {
  fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    now - self.written_at > self.ttl
  }
}

/// Introspection snapshot of the cache, no side effects.
#[derive(Debug, Clone)]
pub struct CacheStats {
  pub size: usize,
  pub capacity: usize,
  pub entries: Vec<EntryStats>,
}

#[derive(Debug, Clone)]
pub struct EntryStats {
  pub key: String,
  pub age: Duration,
  pub ttl: Duration,
}

enum Lookup {
  Miss,
  Expired,
  Hit(serde_json::Value),
}

/// Orders snapshot writes. Every scheduled write takes a generation; a write
/// whose generation is older than the last one applied is skipped, so
/// concurrent background saves cannot leave an outdated snapshot behind.
struct PersistQueue {
  next: AtomicU64,
  last_applied: Mutex<u64>,
}

impl PersistQueue {
  fn new() -> Self {
    Self {
      next: AtomicU64::new(0),
      last_applied: Mutex::new(0),
    }
  }

  fn next_generation(&self) -> u64 {
    self.next.fetch_add(1, Ordering::SeqCst) + 1
  }

  fn apply<F>(&self, generation: u64, what: &str, op: F)
  where
    F: FnOnce() -> Result<(), PersistenceError>,
  {
    let mut last = self.last_applied.lock().unwrap_or_else(|e| e.into_inner());
    if *last >= generation {
      return; // a newer write already reached the backend
    }
    match op() {
      Ok(()) => *last = generation,
      Err(e) => warn!("Failed to {} cache snapshot: {}", what, e),
    }
  }
}

/// Process-wide key/value store with per-entry TTL and capacity eviction.
pub struct TtlCache {
  entries: Mutex<HashMap<String, CacheEntry>>,
  default_ttl: Duration,
  capacity: usize,
  storage: Arc<dyn SnapshotStorage>,
  persist: Arc<PersistQueue>,
}

impl TtlCache {
  /// Open the cache, seeding it from the persisted snapshot. Entries that
  /// expired while the process was down are dropped on load.
  pub fn open(storage: Arc<dyn SnapshotStorage>, default_ttl: Duration, capacity: usize) -> Self {
    let now = Utc::now();
    let mut entries = HashMap::new();

    match storage.load() {
      Ok(persisted) => {
        for (key, entry) in persisted {
          if !entry.is_expired_at(now) {
            entries.insert(key, entry);
          }
        }
      }
      Err(e) => {
        warn!("Failed to load cache snapshot, starting empty: {}", e);
      }
    }

    let cache = Self {
      entries: Mutex::new(entries),
      default_ttl,
      capacity,
      storage,
      persist: Arc::new(PersistQueue::new()),
    };
    cache.evict(&mut cache.lock());
    cache
  }

  /// Store a value under `key`. Evicts expired entries and, if still over
  /// capacity, the oldest-by-`written_at` entries, then mirrors the store to
  /// the snapshot asynchronously.
  pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
    let value = match serde_json::to_value(value) {
      Ok(v) => v,
      Err(e) => {
        // Unserializable values just don't get cached; callers can't fail here.
        warn!("Failed to serialize cache entry for {}: {}", key, e);
        return;
      }
    };

    {
      let mut entries = self.lock();
      entries.insert(
        key.to_string(),
        CacheEntry {
          value,
          written_at: Utc::now(),
          ttl: ttl.unwrap_or(self.default_ttl),
        },
      );
      self.evict(&mut entries);
    }

    self.schedule_persist();
  }

  /// Get a value if present and still within its TTL. An expired entry is
  /// removed from memory on the spot and the deletion is persisted.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let value = match self.lookup(key) {
      Lookup::Miss => {
        debug!("cache miss: {}", key);
        return None;
      }
      Lookup::Expired => {
        debug!("cache expired: {}", key);
        self.lock().remove(key);
        self.schedule_persist();
        return None;
      }
      Lookup::Hit(value) => value,
    };

    match serde_json::from_value(value) {
      Ok(v) => {
        debug!("cache hit: {}", key);
        Some(v)
      }
      Err(e) => {
        // A shape mismatch means the entry was written by other code; drop it.
        warn!("Failed to deserialize cache entry for {}: {}", key, e);
        self.lock().remove(key);
        self.schedule_persist();
        None
      }
    }
  }

  /// Same expiry semantics as `get`, without deserializing the value.
  pub fn has(&self, key: &str) -> bool {
    match self.lookup(key) {
      Lookup::Miss => false,
      Lookup::Expired => {
        self.lock().remove(key);
        self.schedule_persist();
        false
      }
      Lookup::Hit(_) => true,
    }
  }

  fn lookup(&self, key: &str) -> Lookup {
    let entries = self.lock();
    match entries.get(key) {
      None => Lookup::Miss,
      Some(entry) if entry.is_expired_at(Utc::now()) => Lookup::Expired,
      Some(entry) => Lookup::Hit(entry.value.clone()),
    }
  }

  /// Explicitly invalidate a single key.
  pub fn delete(&self, key: &str) {
    let removed = self.lock().remove(key).is_some();
    if removed {
      self.schedule_persist();
    }
  }

  /// Drop every entry and discard the persisted snapshot.
  pub fn clear(&self) {
    self.lock().clear();

    let storage = Arc::clone(&self.storage);
    let queue = Arc::clone(&self.persist);
    let generation = queue.next_generation();
    Self::run_in_background(move || {
      queue.apply(generation, "discard", || storage.discard());
    });
  }

  /// Apply `patch` to every valid entry's value. Entries for which the patch
  /// returns true are rewritten in place and the snapshot is refreshed.
  ///
  /// Used to keep differently-keyed list views consistent after a mutation
  /// commits, without invalidating whole pages.
  pub fn patch_values<F>(&self, mut patch: F)
  where
    F: FnMut(&str, &mut serde_json::Value) -> bool,
  {
    let mut changed = false;
    {
      let now = Utc::now();
      let mut entries = self.lock();
      for (key, entry) in entries.iter_mut() {
        if entry.is_expired_at(now) {
          continue;
        }
        if patch(key, &mut entry.value) {
          changed = true;
        }
      }
    }

    if changed {
      self.schedule_persist();
    }
  }

  /// Introspection only, no side effects.
  pub fn stats(&self) -> CacheStats {
    let now = Utc::now();
    let entries = self.lock();

    let mut per_entry: Vec<EntryStats> = entries
      .iter()
      .map(|(key, entry)| EntryStats {
        key: key.clone(),
        age: now - entry.written_at,
        ttl: entry.ttl,
      })
      .collect();
    per_entry.sort_by(|a, b| a.key.cmp(&b.key));

    CacheStats {
      size: entries.len(),
      capacity: self.capacity,
      entries: per_entry,
    }
  }

  /// Write the snapshot synchronously. Errors are logged like any other
  /// persistence failure. Called before process exit; a straggling scheduled
  /// save cannot undo it afterwards.
  pub fn flush(&self) {
    let entries: Vec<(String, CacheEntry)> = self
      .lock()
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();

    let generation = self.persist.next_generation();
    self
      .persist
      .apply(generation, "persist", || self.storage.save(&entries));
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    // Entry values are plain data; a poisoned lock can only mean a panic
    // mid-eviction, in which case the map is still structurally sound.
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Drop expired entries, then oldest-by-`written_at` entries until the
  /// store fits its capacity.
  fn evict(&self, entries: &mut HashMap<String, CacheEntry>) {
    let now = Utc::now();
    entries.retain(|_, entry| !entry.is_expired_at(now));

    while entries.len() > self.capacity {
      let oldest = entries
        .iter()
        .min_by_key(|(_, entry)| entry.written_at)
        .map(|(key, _)| key.clone());
      match oldest {
        Some(key) => {
          debug!("cache evict (capacity): {}", key);
          entries.remove(&key);
        }
        None => break,
      }
    }
  }

  /// Mirror the store to the snapshot without blocking the caller.
  fn schedule_persist(&self) {
    let entries: Vec<(String, CacheEntry)> = self
      .lock()
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    let storage = Arc::clone(&self.storage);
    let queue = Arc::clone(&self.persist);
    let generation = queue.next_generation();

    Self::run_in_background(move || {
      queue.apply(generation, "persist", || storage.save(&entries));
    });
  }

  fn run_in_background(f: impl FnOnce() + Send + 'static) {
    // Outside a runtime (plain unit tests, early startup) just run inline;
    // the snapshot writes are small.
    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        handle.spawn_blocking(f);
      }
      Err(_) => f(),
    }
  }
}
