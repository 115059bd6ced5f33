//! Pagination controller.
//!
//! Each page is its own cache key, so navigating back to a visited page
//! within its TTL is a cache hit and no fetch is issued. Changing filters
//! resets to page 1 and deletes nothing; stale pages age out naturally.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::keys::{FilterExpr, ResourceKey, ResourceKind};
use crate::api::model::{ListResource, PageInfo};
use crate::error::ClientError;
use crate::loader::{ListFetcher, ListRequest, LoadOptions, LoadResult, LoadSource, ResourceLoader};
use crate::query::QueryState;

struct Delivery<T> {
  /// Which scheduled load produced this result; deliveries from superseded
  /// loads are discarded on poll.
  generation: u64,
  result: Result<LoadResult<T>, ClientError>,
}

/// Tracks the current page of a filtered list view.
pub struct PageController<T> {
  loader: ResourceLoader<T>,
  fetch: ListFetcher<T>,
  kind: ResourceKind,
  filter: Option<FilterExpr>,
  page: u32,
  page_info: Option<PageInfo>,
  state: QueryState<ListResource<T>>,
  generation: u64,
  tx: mpsc::UnboundedSender<Delivery<T>>,
  rx: mpsc::UnboundedReceiver<Delivery<T>>,
  pending: Option<JoinHandle<()>>,
}

impl<T> PageController<T>
where
  T: Clone + Send + serde::Serialize + serde::de::DeserializeOwned + 'static,
{
  pub fn new(loader: ResourceLoader<T>, fetch: ListFetcher<T>, kind: ResourceKind) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      loader,
      fetch,
      kind,
      filter: None,
      page: 1,
      page_info: None,
      state: QueryState::Idle,
      generation: 0,
      tx,
      rx,
      pending: None,
    }
  }

  /// Move to page `n` (1-based) and load it through the cache.
  pub fn change_page(&mut self, n: u32) {
    self.page = n.max(1);
    self.schedule_load(LoadOptions::default());
  }

  pub fn next_page(&mut self) {
    let last = self.page_info.as_ref().map(|p| p.total_pages).unwrap_or(u32::MAX);
    if self.page < last {
      self.change_page(self.page + 1);
    }
  }

  pub fn prev_page(&mut self) {
    if self.page > 1 {
      self.change_page(self.page - 1);
    }
  }

  /// Replace the filter. Resets to page 1; entries cached under other
  /// filters or pages are left alone to expire by TTL.
  pub fn set_filter(&mut self, filter: Option<FilterExpr>) {
    self.filter = filter;
    self.page = 1;
    self.page_info = None;
    self.schedule_load(LoadOptions::default());
  }

  /// Reload the current page, bypassing cache and throttle.
  pub fn refresh(&mut self) {
    self.schedule_load(LoadOptions::force());
  }

  fn schedule_load(&mut self, options: LoadOptions) {
    if let Some(handle) = self.pending.take() {
      handle.abort();
    }
    self.state = QueryState::Loading;
    self.generation += 1;

    let loader = self.loader.clone();
    let fetch = self.fetch.clone();
    let tx = self.tx.clone();
    let kind = self.kind;
    let page = self.page;
    let filter = self.filter.clone();
    let generation = self.generation;
    debug!("page load scheduled: {} page {}", kind.as_str(), page);

    self.pending = Some(tokio::spawn(async move {
      let key = ResourceKey::List {
        kind,
        page,
        filter: filter.clone(),
      };
      let request = ListRequest { page, filter };
      let result = loader
        .load(&key, || (fetch)(request), options)
        .await;
      let _ = tx.send(Delivery { generation, result });
    }));
  }

  /// Drain delivered results into the observable state. Returns `true` if
  /// the state changed. Results from loads superseded by a later navigation
  /// or filter change are discarded, even when they finished before the
  /// change and were already sitting in the channel.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;

    while let Ok(delivery) = self.rx.try_recv() {
      if delivery.generation != self.generation {
        continue; // superseded
      }
      self.pending = None;

      match delivery.result {
        Ok(LoadResult {
          data: Some(list), ..
        }) => {
          self.page_info = Some(list.page.clone());
          self.state = QueryState::Success(list);
          changed = true;
        }
        Ok(LoadResult {
          source: LoadSource::Deduplicated,
          data: None,
        }) => {}
        Ok(_) => {} // dropped after detach
        Err(e) => {
          self.state = QueryState::Error(e.to_string());
          changed = true;
        }
      }
    }

    changed
  }

  pub fn page(&self) -> u32 {
    self.page
  }

  pub fn page_info(&self) -> Option<&PageInfo> {
    self.page_info.as_ref()
  }

  pub fn state(&self) -> &QueryState<ListResource<T>> {
    &self.state
  }

  /// Abandon any scheduled load and mark the loader detached.
  pub fn teardown(&mut self) {
    if let Some(handle) = self.pending.take() {
      handle.abort();
    }
    self.loader.detach();
  }
}

impl<T> Drop for PageController<T> {
  fn drop(&mut self) {
    if let Some(handle) = self.pending.take() {
      handle.abort();
    }
  }
}
