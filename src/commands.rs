//! CLI subcommands and their runners.

use std::time::Duration;

use clap::Subcommand;
use color_eyre::eyre::eyre;
use color_eyre::Result;

use crate::api::keys::{FilterExpr, ResourceKind};
use crate::api::model::{Equipment, EquipmentStatus, ListResource};
use crate::api::service::InventoryService;
use crate::error::ClientError;
use crate::loader::{LoadResult, LoadSource};
use crate::query::QueryState;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// List equipment
  List {
    #[arg(short, long, default_value_t = 1)]
    page: u32,
    /// Filter by status (available, assigned, maintenance, retired)
    #[arg(short, long)]
    status: Option<EquipmentStatus>,
    /// Only equipment available for assignment
    #[arg(long)]
    available: bool,
    /// Walk every page instead of just one
    #[arg(long, conflicts_with = "page")]
    all: bool,
    /// Bypass the cache and refetch
    #[arg(short, long)]
    force: bool,
  },
  /// Search equipment by name
  Search {
    query: String,
    #[arg(short, long, default_value_t = 1)]
    page: u32,
  },
  /// Show a single record
  Get {
    id: u64,
    /// Bypass the cache and refetch
    #[arg(short, long)]
    force: bool,
  },
  /// Change a record's status (optimistic; rolls back on failure)
  SetStatus { id: u64, status: EquipmentStatus },
  /// Assign a record to someone (optimistic; rolls back on failure)
  Assign { id: u64, assignee: String },
  /// Show cache contents and entry ages
  CacheStats,
  /// Drop the cache and its persisted snapshot
  CacheClear,
}

pub async fn run(command: Command, service: &InventoryService) -> Result<()> {
  match command {
    Command::List {
      page,
      status,
      available,
      all,
      force,
    } => {
      let kind = if available {
        ResourceKind::AvailableEquipment
      } else {
        ResourceKind::Equipment
      };
      let filter = status.map(|s| FilterExpr::eq("status", s.as_str()));

      if all {
        walk_pages(service, kind, filter).await?;
      } else {
        let result = if available {
          service.available_equipment(page, force).await.map_err(report)?
        } else {
          service.list_equipment(page, filter, force).await.map_err(report)?
        };
        print_list(&result);
      }
    }
    Command::Search { query, page } => {
      if page > 1 {
        let result = service.search_equipment(&query, page).await.map_err(report)?;
        print_list(&result);
      } else {
        let mut search = service.search_controller();
        search.on_query_change(&query);
        let list = settle(|| {
          search.poll();
          search.state().clone()
        })
        .await?;
        print_page(&list);
      }
    }
    Command::Get { id, force } => {
      let equipment = service.get_equipment(id, force).await.map_err(report)?;
      print_equipment(&equipment);
    }
    Command::SetStatus { id, status } => {
      let equipment = service.set_status(id, status).await.map_err(report)?;
      println!("updated:");
      print_equipment(&equipment);
    }
    Command::Assign { id, assignee } => {
      let equipment = service.assign(id, &assignee).await.map_err(report)?;
      println!("assigned:");
      print_equipment(&equipment);
    }
    Command::CacheStats => {
      let stats = service.cache_stats();
      println!("{}/{} entries", stats.size, stats.capacity);
      for entry in stats.entries {
        println!(
          "  {}  age {}s  ttl {}s",
          entry.key,
          entry.age.num_seconds(),
          entry.ttl.num_seconds()
        );
      }
    }
    Command::CacheClear => {
      service.clear_cache();
      println!("cache cleared");
    }
  }

  Ok(())
}

/// Fetch every page in order through the pagination controller.
async fn walk_pages(
  service: &InventoryService,
  kind: ResourceKind,
  filter: Option<FilterExpr>,
) -> Result<()> {
  let mut pager = service.page_controller(kind);
  pager.set_filter(filter);

  loop {
    let list = settle(|| {
      pager.poll();
      pager.state().clone()
    })
    .await?;
    print_items(&list.items);

    if list.page.current_page >= list.page.total_pages {
      println!("{} total", list.page.total);
      return Ok(());
    }
    pager.next_page();
  }
}

/// Poll a controller until its query settles, failing after a minute.
async fn settle<F>(mut poll: F) -> Result<ListResource<Equipment>>
where
  F: FnMut() -> QueryState<ListResource<Equipment>>,
{
  let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
  loop {
    match poll() {
      QueryState::Success(list) => return Ok(list),
      QueryState::Error(message) => return Err(eyre!(message)),
      _ => {}
    }
    if tokio::time::Instant::now() >= deadline {
      return Err(eyre!("timed out waiting for the load to settle"));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
}

/// Turn a client error into the user-facing report, flagging failures that
/// are worth simply retrying.
fn report(error: ClientError) -> color_eyre::Report {
  if error.is_transient() {
    eyre!("{} (retrying may succeed)", error)
  } else {
    eyre!(error)
  }
}

fn print_items(items: &[Equipment]) {
  for item in items {
    println!(
      "{:>6}  {:<30}  {:<12}  {}",
      item.id,
      item.name,
      item.status,
      item.assigned_to.as_deref().unwrap_or("-")
    );
  }
}

fn print_page(list: &ListResource<Equipment>) {
  print_items(&list.items);
  println!(
    "page {}/{} ({} total)",
    list.page.current_page, list.page.total_pages, list.page.total
  );
}

fn print_list(result: &LoadResult<Equipment>) {
  let label = match result.source {
    LoadSource::Network => "network",
    LoadSource::Cache => "cache",
    LoadSource::Deduplicated => "deduplicated",
    LoadSource::Dropped => "dropped",
  };

  match &result.data {
    Some(list) => {
      print_items(&list.items);
      println!(
        "page {}/{} ({} total, from {})",
        list.page.current_page, list.page.total_pages, list.page.total, label
      );
    }
    None => println!("(no data, {})", label),
  }
}

fn print_equipment(equipment: &Equipment) {
  println!("id:          {}", equipment.id);
  println!("name:        {}", equipment.name);
  println!("status:      {}", equipment.status);
  if let Some(serial) = &equipment.serial {
    println!("serial:      {}", serial);
  }
  if let Some(assignee) = &equipment.assigned_to {
    println!("assigned to: {}", assignee);
  }
  if let Some(location) = &equipment.location {
    println!("location:    {}", location);
  }
  if let Some(updated) = &equipment.updated_at {
    println!("updated:     {}", updated);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn transient_errors_carry_a_retry_hint() {
    let transient = report(ClientError::Network("connection reset".into()));
    assert!(format!("{}", transient).contains("retrying may succeed"));

    let permanent = report(ClientError::Auth("token expired".into()));
    assert!(!format!("{}", permanent).contains("retrying may succeed"));
  }
}
