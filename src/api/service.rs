//! Inventory service: the cached, mutation-aware facade over the HTTP client.
//!
//! Wires the TTL cache, fetch guard and resource loader together and exposes
//! the operations the CLI (or any embedding UI) consumes. All caching policy
//! lives in the loader; this module only decides keys, filters and payloads.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::client::InventoryClient;
use super::keys::{normalize_query, FilterExpr, ResourceKey, ResourceKind};
use super::model::{Equipment, EquipmentStatus};
use crate::cache::{CacheStats, NoopStorage, SnapshotStorage, SqliteStorage, TtlCache};
use crate::config::{CacheConfig, Config};
use crate::error::ClientError;
use crate::guard::FetchGuard;
use crate::loader::{ListFetcher, ListRequest, LoadOptions, LoadResult, ResourceLoader};
use crate::optimistic::{ApplyOptions, OptimisticCell};
use crate::pager::PageController;
use crate::search::SearchController;

/// Client facade with transparent caching and optimistic mutations.
#[derive(Clone)]
pub struct InventoryService {
  client: InventoryClient,
  cache: Arc<TtlCache>,
  loader: ResourceLoader<Equipment>,
  settings: CacheConfig,
}

impl InventoryService {
  /// Build the service. An unusable snapshot backend degrades to a
  /// memory-only cache; it never fails construction.
  pub fn new(config: &Config) -> Result<Self, ClientError> {
    let client = InventoryClient::new(config)?;

    let storage: Arc<dyn SnapshotStorage> = if config.cache.no_persistence {
      Arc::new(NoopStorage)
    } else {
      match SqliteStorage::open() {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
          warn!("cache persistence unavailable, running memory-only: {}", e);
          Arc::new(NoopStorage)
        }
      }
    };

    let cache = Arc::new(TtlCache::open(
      storage,
      config.cache.ttl(),
      config.cache.capacity,
    ));
    let loader = ResourceLoader::new(
      Arc::clone(&cache),
      FetchGuard::new(),
      config.cache.min_fetch_interval(),
    );

    Ok(Self {
      client,
      cache,
      loader,
      settings: config.cache.clone(),
    })
  }

  /// One page of all equipment.
  pub async fn list_equipment(
    &self,
    page: u32,
    filter: Option<FilterExpr>,
    force: bool,
  ) -> Result<LoadResult<Equipment>, ClientError> {
    self.load_list(ResourceKind::Equipment, page, filter, force).await
  }

  /// One page of equipment currently available for assignment. A distinct
  /// resource key over the same backing endpoint.
  pub async fn available_equipment(
    &self,
    page: u32,
    force: bool,
  ) -> Result<LoadResult<Equipment>, ClientError> {
    self
      .load_list(ResourceKind::AvailableEquipment, page, None, force)
      .await
  }

  /// Immediate (non-debounced) search; the debounced path is
  /// [`InventoryService::search_controller`].
  pub async fn search_equipment(
    &self,
    query: &str,
    page: u32,
  ) -> Result<LoadResult<Equipment>, ClientError> {
    let query = normalize_query(query);
    if query.is_empty() {
      return self.list_equipment(page, None, false).await;
    }

    let key = ResourceKey::Search {
      kind: ResourceKind::Equipment,
      query: query.clone(),
      page,
    };
    let filter = FilterExpr::contains("name", &query);
    let client = self.client.clone();
    self
      .loader
      .load(
        &key,
        move || async move {
          client
            .fetch_list(ResourceKind::Equipment, page, Some(&filter))
            .await
        },
        LoadOptions::default(),
      )
      .await
  }

  /// Fetch a single record, cache-first.
  pub async fn get_equipment(&self, id: u64, force: bool) -> Result<Equipment, ClientError> {
    let key = ResourceKey::Detail { id }.cache_hash();

    if !force {
      if let Some(cached) = self.cache.get::<Equipment>(&key) {
        return Ok(cached);
      }
    }

    let equipment = self.client.fetch_one(id).await?;
    self.cache.set(&key, &equipment, None);
    Ok(equipment)
  }

  /// Optimistically change a record's status.
  pub async fn set_status(
    &self,
    id: u64,
    status: EquipmentStatus,
  ) -> Result<Equipment, ClientError> {
    let current = self.get_equipment(id, false).await?;

    let mut optimistic = current.clone();
    optimistic.status = status;
    if status != EquipmentStatus::Assigned {
      optimistic.assigned_to = None;
    }

    self
      .apply_mutation(id, current, optimistic, json!({ "status": status.as_str() }))
      .await
  }

  /// Optimistically assign a record to someone.
  pub async fn assign(&self, id: u64, assignee: &str) -> Result<Equipment, ClientError> {
    let current = self.get_equipment(id, false).await?;

    let mut optimistic = current.clone();
    optimistic.status = EquipmentStatus::Assigned;
    optimistic.assigned_to = Some(assignee.to_string());

    self
      .apply_mutation(
        id,
        current,
        optimistic,
        json!({ "status": "assigned", "assigned_to": assignee }),
      )
      .await
  }

  /// Debounced search over equipment names.
  pub fn search_controller(&self) -> SearchController<Equipment> {
    SearchController::new(
      self.loader.fork(),
      self.list_fetcher(ResourceKind::Equipment),
      ResourceKind::Equipment,
      "name",
      self.settings.debounce(),
    )
  }

  /// Page-by-page browsing of a resource kind.
  pub fn page_controller(&self, kind: ResourceKind) -> PageController<Equipment> {
    PageController::new(self.loader.fork(), self.list_fetcher(kind), kind)
  }

  pub fn cache_stats(&self) -> CacheStats {
    self.cache.stats()
  }

  pub fn clear_cache(&self) {
    self.cache.clear();
  }

  /// Write the snapshot before exit so the next invocation starts warm.
  pub fn flush(&self) {
    self.cache.flush();
  }

  fn list_fetcher(&self, kind: ResourceKind) -> ListFetcher<Equipment> {
    let client = self.client.clone();
    Arc::new(move |request: ListRequest| {
      let client = client.clone();
      Box::pin(async move {
        client
          .fetch_list(kind, request.page, request.filter.as_ref())
          .await
      })
    })
  }

  async fn load_list(
    &self,
    kind: ResourceKind,
    page: u32,
    filter: Option<FilterExpr>,
    force: bool,
  ) -> Result<LoadResult<Equipment>, ClientError> {
    let key = ResourceKey::List {
      kind,
      page,
      filter: filter.clone(),
    };
    let client = self.client.clone();
    self
      .loader
      .load(
        &key,
        move || async move { client.fetch_list(kind, page, filter.as_ref()).await },
        LoadOptions {
          force_refresh: force,
          ttl: None,
        },
      )
      .await
  }

  /// Run a mutation through the optimistic coordinator and, on commit,
  /// propagate the authoritative record into every cached view.
  async fn apply_mutation(
    &self,
    id: u64,
    current: Equipment,
    optimistic: Equipment,
    payload: Value,
  ) -> Result<Equipment, ClientError> {
    let cell = OptimisticCell::new(current);
    let client = self.client.clone();

    let outcome = cell
      .apply(
        optimistic,
        move || async move { client.mutate(id, &payload).await },
        ApplyOptions {
          timeout: self.settings.mutation_timeout(),
          rollback_on_error: true,
        },
      )
      .await;

    match outcome {
      Ok(server) => {
        self.commit_entity(&server);
        Ok(server)
      }
      Err(failure) => {
        debug!(
          "mutation on equipment {} rolled back to '{}'",
          id, failure.snapshot.name
        );
        Err(failure.error)
      }
    }
  }

  /// Write the committed record into its detail entry and rewrite it inside
  /// every cached list that contains it, keeping differently-keyed views
  /// ("all", "available", searches, pages) consistent without invalidation.
  fn commit_entity(&self, equipment: &Equipment) {
    let detail_key = ResourceKey::Detail { id: equipment.id }.cache_hash();
    self.cache.set(&detail_key, equipment, None);
    patch_cached_lists(&self.cache, equipment);
  }
}

/// Replace `equipment` inside every cached list value that contains an item
/// with the same id.
pub(crate) fn patch_cached_lists(cache: &TtlCache, equipment: &Equipment) {
  let patched = match serde_json::to_value(equipment) {
    Ok(v) => v,
    Err(e) => {
      warn!("failed to serialize committed entity: {}", e);
      return;
    }
  };

  cache.patch_values(|_, value| {
    let Some(items) = value.get_mut("items").and_then(Value::as_array_mut) else {
      return false;
    };

    let mut changed = false;
    for item in items.iter_mut() {
      if item.get("id").and_then(Value::as_u64) == Some(equipment.id) {
        *item = patched.clone();
        changed = true;
      }
    }
    changed
  });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::model::{ListResource, PageInfo};
  use crate::cache::NoopStorage;

  fn equipment(id: u64, name: &str, status: EquipmentStatus) -> Equipment {
    Equipment {
      id,
      name: name.to_string(),
      serial: None,
      status,
      assigned_to: None,
      location: None,
      updated_at: None,
    }
  }

  fn memory_cache() -> TtlCache {
    TtlCache::open(Arc::new(NoopStorage), chrono::Duration::seconds(60), 100)
  }

  #[tokio::test]
  async fn committed_entity_is_rewritten_in_every_cached_list() {
    let cache = memory_cache();

    let all_key = ResourceKey::List {
      kind: ResourceKind::Equipment,
      page: 1,
      filter: None,
    }
    .cache_hash();
    let available_key = ResourceKey::List {
      kind: ResourceKind::AvailableEquipment,
      page: 1,
      filter: None,
    }
    .cache_hash();

    let list = ListResource {
      items: vec![
        equipment(1, "Drill", EquipmentStatus::Available),
        equipment(2, "Saw", EquipmentStatus::Available),
      ],
      page: PageInfo::single_page(2),
    };
    cache.set(&all_key, &list, None);
    cache.set(&available_key, &list, None);

    let mut updated = equipment(1, "Drill", EquipmentStatus::Assigned);
    updated.assigned_to = Some("kim".to_string());
    patch_cached_lists(&cache, &updated);

    for key in [&all_key, &available_key] {
      let patched: ListResource<Equipment> = cache.get(key).unwrap();
      assert_eq!(patched.items[0].status, EquipmentStatus::Assigned);
      assert_eq!(patched.items[0].assigned_to.as_deref(), Some("kim"));
      // untouched sibling stays as-is
      assert_eq!(patched.items[1], equipment(2, "Saw", EquipmentStatus::Available));
    }
  }

  #[tokio::test]
  async fn patch_ignores_lists_without_the_entity() {
    let cache = memory_cache();

    let key = ResourceKey::List {
      kind: ResourceKind::Equipment,
      page: 2,
      filter: None,
    }
    .cache_hash();
    let list = ListResource {
      items: vec![equipment(7, "Ladder", EquipmentStatus::Available)],
      page: PageInfo::single_page(1),
    };
    cache.set(&key, &list, None);

    patch_cached_lists(&cache, &equipment(1, "Drill", EquipmentStatus::Retired));

    let unchanged: ListResource<Equipment> = cache.get(&key).unwrap();
    assert_eq!(unchanged, list);
  }
}
