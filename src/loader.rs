//! Resource loader: cache-first fetching with dedup, throttling and
//! write-through.
//!
//! One parameterized loader replaces per-screen fetch logic; every call site
//! gets the same policy. The loader performs no retries and owns no timeout;
//! both are the caller's (or the transport's) business.

use chrono::Duration;
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

use crate::api::keys::{FilterExpr, ResourceKey};
use crate::api::model::ListResource;
use crate::cache::TtlCache;
use crate::error::ClientError;
use crate::guard::FetchGuard;

/// Parameters the controllers hand to a list fetcher.
#[derive(Debug, Clone)]
pub struct ListRequest {
  pub page: u32,
  pub filter: Option<FilterExpr>,
}

/// Factory producing list-fetch futures, the controllers' narrow view of the
/// data source.
pub type ListFetcher<T> =
  Arc<dyn Fn(ListRequest) -> BoxFuture<'static, Result<ListResource<T>, ClientError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
  /// Skip the cache consult and bypass the throttle (not the in-flight check)
  pub force_refresh: bool,
  /// Override the cache's default TTL for this write
  pub ttl: Option<Duration>,
}

impl LoadOptions {
  pub fn force() -> Self {
    Self {
      force_refresh: true,
      ttl: None,
    }
  }
}

/// Where a load's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
  /// Fresh data from the data source, written through to the cache
  Network,
  /// Valid cache entry, no network call
  Cache,
  /// The fetch guard refused (in flight or throttled); data is the last
  /// known value if there is one. Not an error.
  Deduplicated,
  /// The consumer detached while the fetch was in flight; the late result
  /// was dropped without being applied anywhere.
  Dropped,
}

#[derive(Debug, Clone)]
pub struct LoadResult<T> {
  pub data: Option<ListResource<T>>,
  pub source: LoadSource,
}

impl<T> LoadResult<T> {
  pub fn items(&self) -> &[T] {
    self.data.as_ref().map(|d| d.items.as_slice()).unwrap_or(&[])
  }
}

struct LoaderInner<T> {
  cache: Arc<TtlCache>,
  guard: Arc<FetchGuard>,
  min_interval: Duration,
  /// Last value delivered per cache key, so a deduplicated call still has
  /// something to hand back
  latest: Mutex<HashMap<String, ListResource<T>>>,
  mounted: AtomicBool,
}

/// Fetches a named, parameterized resource through the cache and guard.
pub struct ResourceLoader<T> {
  inner: Arc<LoaderInner<T>>,
}

impl<T> Clone for ResourceLoader<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T> ResourceLoader<T>
where
  T: Clone + Send + Serialize + DeserializeOwned + 'static,
{
  pub fn new(cache: Arc<TtlCache>, guard: Arc<FetchGuard>, min_interval: Duration) -> Self {
    Self {
      inner: Arc::new(LoaderInner {
        cache,
        guard,
        min_interval,
        latest: Mutex::new(HashMap::new()),
        mounted: AtomicBool::new(true),
      }),
    }
  }

  /// Load `key`, consulting the cache first and writing through on success.
  ///
  /// A guard refusal is a no-op dedup, not a failure: the last known value
  /// (if any) comes back with `LoadSource::Deduplicated`. A fetch failure
  /// propagates to the caller and leaves all previous state untouched.
  pub async fn load<F, Fut>(
    &self,
    key: &ResourceKey,
    fetcher: F,
    options: LoadOptions,
  ) -> Result<LoadResult<T>, ClientError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ListResource<T>, ClientError>>,
  {
    let hash = key.cache_hash();

    if !options.force_refresh {
      if let Some(cached) = self.inner.cache.get::<ListResource<T>>(&hash) {
        debug!("cache hit for {}", key.description());
        self.remember(&hash, &cached);
        return Ok(LoadResult {
          data: Some(cached),
          source: LoadSource::Cache,
        });
      }
    }

    let permit =
      match self
        .inner
        .guard
        .try_begin(&hash, self.inner.min_interval, options.force_refresh)
      {
        Some(permit) => permit,
        None => {
          return Ok(LoadResult {
            data: self.last_known(&hash),
            source: LoadSource::Deduplicated,
          });
        }
      };

    debug!("fetching {}", key.description());
    let result = fetcher().await;
    drop(permit);

    if !self.inner.mounted.load(Ordering::SeqCst) {
      // Consumer went away mid-fetch; never apply or surface late results.
      warn!("dropping late result for {}", key.description());
      return Ok(LoadResult {
        data: None,
        source: LoadSource::Dropped,
      });
    }

    match result {
      Ok(list) => {
        self.inner.cache.set(&hash, &list, options.ttl);
        self.remember(&hash, &list);
        Ok(LoadResult {
          data: Some(list),
          source: LoadSource::Network,
        })
      }
      Err(e) => {
        // Failed refreshes don't clear data; the caller decides what to do.
        error!("fetch failed for {}: {}", key.description(), e);
        Err(e)
      }
    }
  }

  /// A loader over the same cache and guard but with its own lifecycle:
  /// detaching the fork leaves every other consumer mounted. Clones share
  /// lifecycle; forks do not.
  pub fn fork(&self) -> Self {
    Self::new(
      Arc::clone(&self.inner.cache),
      Arc::clone(&self.inner.guard),
      self.inner.min_interval,
    )
  }

  /// Mark the consuming component as gone. Fetches already in flight finish
  /// but their results are dropped instead of applied.
  pub fn detach(&self) {
    self.inner.mounted.store(false, Ordering::SeqCst);
  }

  fn last_known(&self, hash: &str) -> Option<ListResource<T>> {
    self
      .inner
      .latest
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(hash)
      .cloned()
  }

  fn remember(&self, hash: &str, list: &ListResource<T>) {
    self
      .inner
      .latest
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(hash.to_string(), list.clone());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::keys::ResourceKind;
  use crate::api::model::PageInfo;
  use crate::cache::NoopStorage;
  use serde::Deserialize;
  use std::sync::atomic::AtomicU32;
  use std::time::Duration as StdDuration;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Item {
    id: u64,
  }

  fn list(ids: &[u64]) -> ListResource<Item> {
    ListResource {
      items: ids.iter().map(|id| Item { id: *id }).collect(),
      page: PageInfo::single_page(ids.len()),
    }
  }

  fn loader(ttl_ms: i64, min_interval_ms: i64) -> ResourceLoader<Item> {
    let cache = Arc::new(TtlCache::open(
      Arc::new(NoopStorage),
      Duration::milliseconds(ttl_ms),
      100,
    ));
    ResourceLoader::new(
      cache,
      FetchGuard::new(),
      Duration::milliseconds(min_interval_ms),
    )
  }

  fn page_key(page: u32) -> ResourceKey {
    ResourceKey::List {
      kind: ResourceKind::Equipment,
      page,
      filter: None,
    }
  }

  #[tokio::test]
  async fn cache_hit_skips_fetch_and_guard() {
    let loader = loader(60_000, 0);
    let calls = Arc::new(AtomicU32::new(0));

    for expected_source in [LoadSource::Network, LoadSource::Cache] {
      let calls = calls.clone();
      let result = loader
        .load(
          &page_key(1),
          move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(list(&[1, 2]))
          },
          LoadOptions::default(),
        )
        .await
        .unwrap();
      assert_eq!(result.source, expected_source);
      assert_eq!(result.items().len(), 2);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn force_refresh_bypasses_cache() {
    let loader = loader(60_000, 0);
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
      let calls = calls.clone();
      loader
        .load(
          &page_key(1),
          move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(list(&[1]))
          },
          LoadOptions::force(),
        )
        .await
        .unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn concurrent_load_for_same_key_is_deduplicated() {
    let loader = loader(60_000, 0);

    let slow = loader.clone();
    let first = tokio::spawn(async move {
      slow
        .load(
          &page_key(1),
          || async {
            tokio::time::sleep(StdDuration::from_millis(100)).await;
            Ok(list(&[1]))
          },
          LoadOptions::default(),
        )
        .await
    });

    tokio::time::sleep(StdDuration::from_millis(20)).await;

    let second = loader
      .load(
        &page_key(1),
        || async { Ok(list(&[99])) },
        LoadOptions::default(),
      )
      .await
      .unwrap();
    assert_eq!(second.source, LoadSource::Deduplicated);
    assert!(second.data.is_none()); // no prior value to hand back

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.source, LoadSource::Network);
    assert_eq!(first.items(), &[Item { id: 1 }]);
  }

  #[tokio::test]
  async fn throttled_reload_returns_last_known_value() {
    // TTL short, throttle long: the cache expires but the guard still
    // refuses an immediate unforced refetch.
    let loader = loader(30, 60_000);

    loader
      .load(
        &page_key(1),
        || async { Ok(list(&[1])) },
        LoadOptions::default(),
      )
      .await
      .unwrap();

    tokio::time::sleep(StdDuration::from_millis(60)).await;

    let result = loader
      .load(
        &page_key(1),
        || async { Ok(list(&[2])) },
        LoadOptions::default(),
      )
      .await
      .unwrap();
    assert_eq!(result.source, LoadSource::Deduplicated);
    assert_eq!(result.items(), &[Item { id: 1 }]);
  }

  #[tokio::test]
  async fn failed_refresh_preserves_previous_state() {
    let loader = loader(60_000, 0);

    loader
      .load(
        &page_key(1),
        || async { Ok(list(&[1])) },
        LoadOptions::default(),
      )
      .await
      .unwrap();

    let err = loader
      .load(
        &page_key(1),
        || async { Err(ClientError::Network("connection reset".into())) },
        LoadOptions::force(),
      )
      .await
      .unwrap_err();
    assert!(matches!(err, ClientError::Network(_)));

    // previous value still observable from the cache
    let cached = loader
      .load(
        &page_key(1),
        || async { Ok(list(&[99])) },
        LoadOptions::default(),
      )
      .await
      .unwrap();
    assert_eq!(cached.source, LoadSource::Cache);
    assert_eq!(cached.items(), &[Item { id: 1 }]);
  }

  #[tokio::test]
  async fn detached_loader_drops_late_results() {
    let cache = Arc::new(TtlCache::open(
      Arc::new(NoopStorage),
      Duration::milliseconds(60_000),
      100,
    ));
    let loader = ResourceLoader::<Item>::new(
      Arc::clone(&cache),
      FetchGuard::new(),
      Duration::zero(),
    );

    let task_loader = loader.clone();
    let handle = tokio::spawn(async move {
      task_loader
        .load(
          &page_key(1),
          || async {
            tokio::time::sleep(StdDuration::from_millis(80)).await;
            Ok(list(&[1]))
          },
          LoadOptions::default(),
        )
        .await
    });

    tokio::time::sleep(StdDuration::from_millis(20)).await;
    loader.detach();

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.source, LoadSource::Dropped);
    assert!(result.data.is_none());
    // the late result was never written through
    assert!(!cache.has(&page_key(1).cache_hash()));
  }

  #[tokio::test]
  async fn detaching_a_fork_leaves_the_original_mounted() {
    let loader = loader(60_000, 0);
    let fork = loader.fork();
    fork.detach();

    let result = loader
      .load(
        &page_key(1),
        || async { Ok(list(&[1])) },
        LoadOptions::default(),
      )
      .await
      .unwrap();
    assert_eq!(result.source, LoadSource::Network);
  }

  #[tokio::test]
  async fn distinct_pages_cache_independently() {
    let loader = loader(60_000, 0);
    let calls = Arc::new(AtomicU32::new(0));

    for page in [1, 2, 1, 2] {
      let calls = calls.clone();
      loader
        .load(
          &page_key(page),
          move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(list(&[page as u64]))
          },
          LoadOptions::default(),
        )
        .await
        .unwrap();
    }

    // revisits of both pages were cache hits
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}
