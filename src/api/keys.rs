//! Resource keys and filter expressions.
//!
//! A `ResourceKey` names one parameterized fetch target (kind + page +
//! filter). Its hash is the cache key, so distinct pages and distinct
//! filters cache independently.

use sha2::{Digest, Sha256};

/// The logical resource kinds this client fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
  /// Every equipment record
  Equipment,
  /// Equipment currently available for assignment (same backing endpoint,
  /// pre-filtered server side)
  AvailableEquipment,
}

impl ResourceKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceKind::Equipment => "equipment",
      ResourceKind::AvailableEquipment => "equipment_available",
    }
  }

  /// Filter segment the kind implies on the shared equipment endpoint.
  pub fn base_filter(&self) -> Option<FilterExpr> {
    match self {
      ResourceKind::Equipment => None,
      ResourceKind::AvailableEquipment => Some(FilterExpr::eq("status", "available")),
    }
  }
}

/// A backend filter expression: `field|operator|value` segments joined by `;`.
/// The syntax is the backend's convention; this type only assembles and
/// normalizes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterExpr {
  segments: Vec<String>,
}

impl FilterExpr {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(mut self, field: &str, operator: &str, value: &str) -> Self {
    self
      .segments
      .push(format!("{}|{}|{}", field, operator, value));
    self
  }

  pub fn contains(field: &str, value: &str) -> Self {
    Self::new().push(field, "contains", value)
  }

  pub fn eq(field: &str, value: &str) -> Self {
    Self::new().push(field, "eq", value)
  }

  /// Append another expression's segments to this one.
  pub fn and(mut self, other: &FilterExpr) -> Self {
    self.segments.extend(other.segments.iter().cloned());
    self
  }

  pub fn is_empty(&self) -> bool {
    self.segments.is_empty()
  }

  /// The wire form sent to the backend.
  pub fn render(&self) -> String {
    self.segments.join(";")
  }

  /// Form used for cache hashing: trimmed and lowercased so equivalent
  /// filters share a cache entry.
  fn normalized(&self) -> String {
    self.render().trim().to_lowercase()
  }
}

/// Identifies a specific parameterized fetch target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKey {
  /// One page of a listed resource kind
  List {
    kind: ResourceKind,
    page: u32,
    filter: Option<FilterExpr>,
  },
  /// A search over a resource kind, normalized query text
  Search {
    kind: ResourceKind,
    query: String,
    page: u32,
  },
  /// A single record
  Detail { id: u64 },
}

impl ResourceKey {
  /// Stable fixed-length cache key.
  pub fn cache_hash(&self) -> String {
    let input = match self {
      Self::List { kind, page, filter } => format!(
        "list:{}:{}:{}",
        kind.as_str(),
        page,
        filter.as_ref().map(|f| f.normalized()).unwrap_or_default()
      ),
      Self::Search { kind, query, page } => {
        format!("search:{}:{}:{}", kind.as_str(), normalize_query(query), page)
      }
      Self::Detail { id } => format!("detail:{}", id),
    };

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Human-readable form for logs.
  pub fn description(&self) -> String {
    match self {
      Self::List { kind, page, filter } => match filter {
        Some(f) if !f.is_empty() => {
          format!("{} page {} [{}]", kind.as_str(), page, f.render())
        }
        _ => format!("{} page {}", kind.as_str(), page),
      },
      Self::Search { kind, query, page } => {
        format!("{} search '{}' page {}", kind.as_str(), query, page)
      }
      Self::Detail { id } => format!("equipment {}", id),
    }
  }
}

/// Normalize query text for hashing. Whitespace-only collapses to the empty
/// query, which is the "no filter" case.
pub fn normalize_query(query: &str) -> String {
  query.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn filter_renders_pipe_and_semicolon_syntax() {
    let filter = FilterExpr::new()
      .push("status", "eq", "available")
      .push("name", "contains", "drill");
    assert_eq!(filter.render(), "status|eq|available;name|contains|drill");
  }

  #[test]
  fn equivalent_filters_hash_identically() {
    let a = ResourceKey::List {
      kind: ResourceKind::Equipment,
      page: 1,
      filter: Some(FilterExpr::contains("name", "Drill")),
    };
    let b = ResourceKey::List {
      kind: ResourceKind::Equipment,
      page: 1,
      filter: Some(FilterExpr::contains("name", "drill")),
    };
    assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn pages_and_kinds_hash_distinctly() {
    let page1 = ResourceKey::List {
      kind: ResourceKind::Equipment,
      page: 1,
      filter: None,
    };
    let page2 = ResourceKey::List {
      kind: ResourceKind::Equipment,
      page: 2,
      filter: None,
    };
    let available = ResourceKey::List {
      kind: ResourceKind::AvailableEquipment,
      page: 1,
      filter: None,
    };
    assert_ne!(page1.cache_hash(), page2.cache_hash());
    assert_ne!(page1.cache_hash(), available.cache_hash());
  }

  #[test]
  fn whitespace_query_normalizes_to_empty() {
    assert_eq!(normalize_query("   "), "");
    assert_eq!(normalize_query("  Drill "), "drill");
  }
}
