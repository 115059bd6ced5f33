//! Debounced search controller.
//!
//! Coalesces rapid query-text changes into a single delayed load through the
//! resource loader. A cleared search (empty/whitespace query) is the common
//! "show everything again" case and skips the debounce delay entirely.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::keys::{normalize_query, FilterExpr, ResourceKey, ResourceKind};
use crate::api::model::ListResource;
use crate::error::ClientError;
use crate::loader::{ListFetcher, ListRequest, LoadOptions, LoadResult, LoadSource, ResourceLoader};
use crate::query::QueryState;

struct Delivery<T> {
  query: String,
  result: Result<LoadResult<T>, ClientError>,
}

/// Turns keystrokes into at most one load per quiescence window.
pub struct SearchController<T> {
  loader: ResourceLoader<T>,
  fetch: ListFetcher<T>,
  kind: ResourceKind,
  /// Field the query text filters on, e.g. "name"
  search_field: String,
  debounce: Duration,
  state: QueryState<ListResource<T>>,
  current_query: String,
  tx: mpsc::UnboundedSender<Delivery<T>>,
  rx: mpsc::UnboundedReceiver<Delivery<T>>,
  pending: Option<JoinHandle<()>>,
}

impl<T> SearchController<T>
where
  T: Clone + Send + serde::Serialize + serde::de::DeserializeOwned + 'static,
{
  pub fn new(
    loader: ResourceLoader<T>,
    fetch: ListFetcher<T>,
    kind: ResourceKind,
    search_field: impl Into<String>,
    debounce: Duration,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      loader,
      fetch,
      kind,
      search_field: search_field.into(),
      debounce,
      state: QueryState::Idle,
      current_query: String::new(),
      tx,
      rx,
      pending: None,
    }
  }

  /// React to a query-text change. Any change during the wait window cancels
  /// and restarts the timer; only the last text in a burst is fetched.
  pub fn on_query_change(&mut self, text: &str) {
    let query = normalize_query(text);

    // Restart the window: the previous scheduled load is obsolete.
    if let Some(handle) = self.pending.take() {
      handle.abort();
    }

    self.current_query = query.clone();
    self.state = QueryState::Loading;

    // Cleared search should feel instant.
    let delay = if query.is_empty() {
      Duration::ZERO
    } else {
      self.debounce
    };
    debug!("search scheduled: '{}' in {:?}", query, delay);

    let loader = self.loader.clone();
    let fetch = self.fetch.clone();
    let tx = self.tx.clone();
    let kind = self.kind;
    let field = self.search_field.clone();

    self.pending = Some(tokio::spawn(async move {
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }

      let (key, filter) = if query.is_empty() {
        (
          ResourceKey::List {
            kind,
            page: 1,
            filter: None,
          },
          None,
        )
      } else {
        (
          ResourceKey::Search {
            kind,
            query: query.clone(),
            page: 1,
          },
          Some(FilterExpr::contains(&field, &query)),
        )
      };

      let request = ListRequest { page: 1, filter };
      let result = loader
        .load(&key, || (fetch)(request), LoadOptions::default())
        .await;
      let _ = tx.send(Delivery { query, result });
    }));
  }

  /// Drain delivered results into the observable state.
  ///
  /// Returns `true` if the state changed. Results for a query that is no
  /// longer the current one are discarded.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;

    while let Ok(delivery) = self.rx.try_recv() {
      if delivery.query != self.current_query {
        continue; // stale
      }
      self.pending = None;

      match delivery.result {
        Ok(LoadResult {
          data: Some(list), ..
        }) => {
          self.state = QueryState::Success(list);
          changed = true;
        }
        Ok(LoadResult {
          source: LoadSource::Deduplicated,
          data: None,
        }) => {
          // another fetch for this key is already in flight; keep waiting
        }
        Ok(_) => {} // dropped after detach
        Err(e) => {
          self.state = QueryState::Error(e.to_string());
          changed = true;
        }
      }
    }

    changed
  }

  pub fn state(&self) -> &QueryState<ListResource<T>> {
    &self.state
  }

  pub fn query(&self) -> &str {
    &self.current_query
  }

  /// Abandon any scheduled load and mark the loader detached.
  pub fn teardown(&mut self) {
    if let Some(handle) = self.pending.take() {
      handle.abort();
    }
    self.loader.detach();
  }
}

impl<T> Drop for SearchController<T> {
  fn drop(&mut self) {
    if let Some(handle) = self.pending.take() {
      handle.abort();
    }
  }
}
