//! Optimistic mutation coordinator.
//!
//! Applies a tentative local value immediately, runs the remote mutation
//! under a timeout, then commits the authoritative server result or rolls
//! back to the snapshot captured at apply time. Rollback snapshots nest in
//! call order: a second `apply` issued while one is outstanding captures the
//! currently observed (possibly optimistic) value, so rapid sequential edits
//! roll back to the immediately preceding state.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ClientError;

/// Observable state of an optimistic value.
#[derive(Debug, Clone)]
pub struct OptimisticState<T> {
  /// Last value confirmed by the server
  pub committed: T,
  /// Tentative value, present only while confirmation is outstanding or an
  /// errored optimistic value was kept
  pub pending: Option<T>,
  pub is_optimistic: bool,
  /// Message of the last failed mutation, if any
  pub error: Option<String>,
}

impl<T: Clone> OptimisticState<T> {
  /// The value consumers observe: pending while optimistic, committed
  /// otherwise.
  pub fn observed(&self) -> T {
    if self.is_optimistic {
      if let Some(pending) = &self.pending {
        return pending.clone();
      }
    }
    self.committed.clone()
  }
}

#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
  /// How long to wait for the remote confirmation
  pub timeout: Duration,
  /// Roll back to the snapshot on failure (default); otherwise keep the
  /// optimistic value and just mark it errored
  pub rollback_on_error: bool,
}

impl Default for ApplyOptions {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(10),
      rollback_on_error: true,
    }
  }
}

/// A failed mutation, carrying the snapshot the caller can recover with.
#[derive(Debug)]
pub struct MutationFailure<T> {
  pub error: ClientError,
  /// The value observed just before this apply; equals the restored state
  /// when rollback is enabled.
  pub snapshot: T,
}

struct CellInner<T> {
  state: Mutex<OptimisticState<T>>,
  mounted: AtomicBool,
}

/// Holds one optimistic value and coordinates mutations against it.
pub struct OptimisticCell<T> {
  inner: Arc<CellInner<T>>,
}

impl<T> Clone for OptimisticCell<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Clone + Send + 'static> OptimisticCell<T> {
  pub fn new(committed: T) -> Self {
    Self {
      inner: Arc::new(CellInner {
        state: Mutex::new(OptimisticState {
          committed,
          pending: None,
          is_optimistic: false,
          error: None,
        }),
        mounted: AtomicBool::new(true),
      }),
    }
  }

  pub fn state(&self) -> OptimisticState<T> {
    self.lock().clone()
  }

  /// The value consumers currently observe.
  pub fn observed(&self) -> T {
    self.lock().observed()
  }

  /// Mark the consuming component as gone; outcomes of in-flight mutations
  /// are dropped instead of applied.
  pub fn detach(&self) {
    self.inner.mounted.store(false, Ordering::SeqCst);
  }

  /// Apply `optimistic` immediately, run `mutation` under the timeout, then
  /// commit the server result or roll back to the pre-apply snapshot.
  pub async fn apply<F, Fut>(
    &self,
    optimistic: T,
    mutation: F,
    options: ApplyOptions,
  ) -> Result<T, MutationFailure<T>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
  {
    // Snapshot what is observed right now; if that is itself an optimistic
    // value, this apply nests on top of it.
    let (snapshot, was_optimistic) = {
      let mut state = self.lock();
      let snapshot = state.observed();
      let was_optimistic = state.is_optimistic;
      state.pending = Some(optimistic);
      state.is_optimistic = true;
      state.error = None;
      (snapshot, was_optimistic)
    };

    let outcome = match tokio::time::timeout(options.timeout, mutation()).await {
      Ok(result) => result,
      Err(_) => Err(ClientError::Timeout(options.timeout)),
    };

    if !self.inner.mounted.load(Ordering::SeqCst) {
      // Teardown race: leave state alone, report the outcome without
      // touching anything a late consumer could observe.
      warn!("dropping mutation outcome after detach");
      return outcome.map_err(|error| MutationFailure {
        error,
        snapshot,
      });
    }

    match outcome {
      Ok(server_value) => {
        let mut state = self.lock();
        state.committed = server_value.clone();
        state.pending = None;
        state.is_optimistic = false;
        state.error = None;
        debug!("optimistic mutation committed");
        Ok(server_value)
      }
      Err(error) => {
        {
          let mut state = self.lock();
          if options.rollback_on_error {
            // Restore the snapshot as the observed value. If an outer
            // optimistic apply is still outstanding, stay optimistic on its
            // value rather than jumping past it to the committed state.
            if was_optimistic {
              state.pending = Some(snapshot.clone());
              state.is_optimistic = true;
            } else {
              state.pending = None;
              state.is_optimistic = false;
            }
          }
          state.error = Some(error.to_string());
        }
        warn!("optimistic mutation failed: {}", error);
        Err(MutationFailure { error, snapshot })
      }
    }
  }

  fn lock(&self) -> MutexGuard<'_, OptimisticState<T>> {
    self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration as StdDuration;

  fn options(timeout_ms: u64, rollback: bool) -> ApplyOptions {
    ApplyOptions {
      timeout: StdDuration::from_millis(timeout_ms),
      rollback_on_error: rollback,
    }
  }

  #[tokio::test]
  async fn success_commits_server_value_via_optimistic_step() {
    let cell = OptimisticCell::new(vec![1]);
    let observer = cell.clone();

    let result = cell
      .apply(
        vec![1, 99],
        || async move {
          // While the mutation is outstanding the optimistic guess is
          // what consumers observe, even for a fast mutation.
          assert_eq!(observer.observed(), vec![1, 99]);
          assert!(observer.state().is_optimistic);
          // Server assigns a different id than the guess
          Ok(vec![1, 42])
        },
        ApplyOptions::default(),
      )
      .await
      .unwrap();

    assert_eq!(result, vec![1, 42]);
    let state = cell.state();
    assert_eq!(state.committed, vec![1, 42]);
    assert!(!state.is_optimistic);
    assert!(state.pending.is_none());
    assert_eq!(cell.observed(), vec![1, 42]);
  }

  #[tokio::test]
  async fn failure_rolls_back_to_pre_apply_snapshot() {
    let cell = OptimisticCell::new(vec![1]);

    let failure = cell
      .apply(
        vec![1, 99],
        || async { Err(ClientError::Network("500".into())) },
        ApplyOptions::default(),
      )
      .await
      .unwrap_err();

    assert_eq!(failure.snapshot, vec![1]);
    assert_eq!(cell.observed(), vec![1]);
    let state = cell.state();
    assert!(!state.is_optimistic);
    assert!(state.error.is_some());
  }

  #[tokio::test]
  async fn failure_without_rollback_keeps_value_but_marks_error() {
    let cell = OptimisticCell::new(1);

    let failure = cell
      .apply(
        2,
        || async { Err(ClientError::Network("boom".into())) },
        options(1000, false),
      )
      .await
      .unwrap_err();

    assert_eq!(failure.snapshot, 1);
    assert_eq!(cell.observed(), 2); // optimistic value kept
    assert!(cell.state().error.is_some());
  }

  #[tokio::test]
  async fn slow_mutation_times_out_and_rolls_back() {
    let cell = OptimisticCell::new(1);

    let failure = cell
      .apply(
        2,
        || async {
          tokio::time::sleep(StdDuration::from_millis(200)).await;
          Ok(2)
        },
        options(30, true),
      )
      .await
      .unwrap_err();

    assert!(matches!(failure.error, ClientError::Timeout(_)));
    assert_eq!(cell.observed(), 1);
  }

  #[tokio::test]
  async fn nested_apply_rolls_back_to_previous_optimistic_value() {
    let cell = OptimisticCell::new(vec![1]);
    let inner_cell = cell.clone();

    // Outer apply stays pending while the inner one fails.
    let outer = cell.apply(
      vec![1, 2],
      move || async move {
        let failure = inner_cell
          .apply(
            vec![1, 2, 3],
            || async { Err(ClientError::Network("reject".into())) },
            ApplyOptions::default(),
          )
          .await
          .unwrap_err();

        // Inner rollback lands on the outer optimistic value, not on the
        // original committed state.
        assert_eq!(failure.snapshot, vec![1, 2]);

        Ok(vec![1, 2])
      },
      ApplyOptions::default(),
    );

    let committed = outer.await.unwrap();
    assert_eq!(committed, vec![1, 2]);
    assert_eq!(cell.observed(), vec![1, 2]);
  }

  #[tokio::test]
  async fn detached_cell_drops_outcome() {
    let cell = OptimisticCell::new(1);
    let worker = cell.clone();

    let handle = tokio::spawn(async move {
      worker
        .apply(
          2,
          || async {
            tokio::time::sleep(StdDuration::from_millis(80)).await;
            Ok(3)
          },
          ApplyOptions::default(),
        )
        .await
    });

    tokio::time::sleep(StdDuration::from_millis(20)).await;
    cell.detach();

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result, 3); // the server answer still reaches the caller
    // but the shared state was never touched after teardown
    assert_eq!(cell.state().committed, 1);
  }
}
