//! Domain types for the inventory backend.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single equipment record as the backend reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub serial: Option<String>,
  pub status: EquipmentStatus,
  #[serde(default)]
  pub assigned_to: Option<String>,
  #[serde(default)]
  pub location: Option<String>,
  /// ISO 8601 timestamp of the last server-side change
  #[serde(default)]
  pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentStatus {
  Available,
  Assigned,
  Maintenance,
  Retired,
}

impl EquipmentStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      EquipmentStatus::Available => "available",
      EquipmentStatus::Assigned => "assigned",
      EquipmentStatus::Maintenance => "maintenance",
      EquipmentStatus::Retired => "retired",
    }
  }
}

impl fmt::Display for EquipmentStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for EquipmentStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "available" => Ok(EquipmentStatus::Available),
      "assigned" => Ok(EquipmentStatus::Assigned),
      "maintenance" => Ok(EquipmentStatus::Maintenance),
      "retired" => Ok(EquipmentStatus::Retired),
      other => Err(format!("unknown status '{}'", other)),
    }
  }
}

/// One page of a listed resource, in server order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResource<T> {
  pub items: Vec<T>,
  pub page: PageInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
  pub current_page: u32,
  pub total_pages: u32,
  pub per_page: u32,
  pub total: u64,
}

impl PageInfo {
  /// Page info for a response that came back without a pagination block.
  pub fn single_page(count: usize) -> Self {
    Self {
      current_page: 1,
      total_pages: 1,
      per_page: count as u32,
      total: count as u64,
    }
  }
}
