//! Per-resource-key fetch guard: dedup of concurrent fetches plus throttling
//! of rapid retriggers.
//!
//! A successful `try_begin` hands back a `FetchPermit`; dropping the permit
//! clears the in-flight flag, so every exit path of a guarded fetch (success,
//! error, abandonment) releases the key.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct Slot {
  in_flight: bool,
  last_attempt: Option<DateTime<Utc>>,
}

/// Tracks in-flight fetches and last attempt times per resource key.
#[derive(Debug, Default)]
pub struct FetchGuard {
  slots: Mutex<HashMap<String, Slot>>,
}

impl FetchGuard {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Try to begin a fetch for `key`.
  ///
  /// Refuses (returns `None`) when the key is already in flight, or when the
  /// previous attempt was less than `min_interval` ago and the caller did not
  /// force. A forced call bypasses the throttle but never the in-flight check:
  /// at most one fetch per key runs at a time.
  pub fn try_begin(
    &self,
    key: &str,
    min_interval: Duration,
    force: bool,
  ) -> Option<FetchPermit<'_>> {
    let now = Utc::now();
    let mut slots = self.lock();
    let slot = slots.entry(key.to_string()).or_default();

    if slot.in_flight {
      debug!("fetch refused (in flight): {}", key);
      return None;
    }

    if !force {
      if let Some(last) = slot.last_attempt {
        if now - last < min_interval {
          debug!("fetch refused (throttled): {}", key);
          return None;
        }
      }
    }

    slot.in_flight = true;
    slot.last_attempt = Some(now);

    Some(FetchPermit {
      key: key.to_string(),
      guard: self,
    })
  }

  fn end(&self, key: &str) {
    let mut slots = self.lock();
    if let Some(slot) = slots.get_mut(key) {
      slot.in_flight = false;
    }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
    self.slots.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Scoped acquisition of a resource key. Exactly one exists per key at a
/// time; dropping it releases the key.
#[derive(Debug)]
pub struct FetchPermit<'a> {
  key: String,
  guard: &'a FetchGuard,
}

impl Drop for FetchPermit<'_> {
  fn drop(&mut self) {
    self.guard.end(&self.key);
  }
}
