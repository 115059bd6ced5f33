use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the inventory backend, e.g. "https://inventory.example.com/api/v1"
  pub url: String,
  /// Request timeout in seconds for the HTTP client itself
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
}

/// Tuning for the data-freshness layer. Every field has a default so a
/// config file can omit the whole block.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// How long cached list/detail results stay fresh
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
  /// Maximum number of cached entries before oldest-first eviction
  #[serde(default = "default_capacity")]
  pub capacity: usize,
  /// Minimum spacing between fetch attempts for the same resource key
  #[serde(default = "default_min_fetch_interval_ms")]
  pub min_fetch_interval_ms: u64,
  /// Quiescence window before a search keystroke triggers a fetch
  #[serde(default = "default_debounce_ms")]
  pub debounce_ms: u64,
  /// How long an optimistic mutation waits for server confirmation
  #[serde(default = "default_mutation_timeout_secs")]
  pub mutation_timeout_secs: u64,
  /// Disable the durable snapshot entirely (memory-only cache)
  #[serde(default)]
  pub no_persistence: bool,
}

fn default_request_timeout_secs() -> u64 {
  30
}

fn default_ttl_secs() -> u64 {
  300
}

fn default_capacity() -> usize {
  100
}

fn default_min_fetch_interval_ms() -> u64 {
  1000
}

fn default_debounce_ms() -> u64 {
  300
}

fn default_mutation_timeout_secs() -> u64 {
  10
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: default_ttl_secs(),
      capacity: default_capacity(),
      min_fetch_interval_ms: default_min_fetch_interval_ms(),
      debounce_ms: default_debounce_ms(),
      mutation_timeout_secs: default_mutation_timeout_secs(),
      no_persistence: false,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.ttl_secs as i64)
  }

  pub fn min_fetch_interval(&self) -> chrono::Duration {
    chrono::Duration::milliseconds(self.min_fetch_interval_ms as i64)
  }

  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }

  pub fn mutation_timeout(&self) -> Duration {
    Duration::from_secs(self.mutation_timeout_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./depot.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/depot/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/depot/config.yaml\n\
                 with at least an `api.url` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("depot.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("depot").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks DEPOT_API_TOKEN first, then INVENTORY_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("DEPOT_API_TOKEN")
      .or_else(|_| std::env::var("INVENTORY_API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set DEPOT_API_TOKEN or INVENTORY_API_TOKEN environment variable.")
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_minimal_config_with_defaults() {
    let config: Config = serde_yaml::from_str("api:\n  url: https://inv.example.com/api\n").unwrap();
    assert_eq!(config.api.url, "https://inv.example.com/api");
    assert_eq!(config.cache.ttl_secs, 300);
    assert_eq!(config.cache.capacity, 100);
    assert_eq!(config.cache.debounce_ms, 300);
    assert!(!config.cache.no_persistence);
  }

  #[test]
  fn cache_block_overrides() {
    let yaml = "api:\n  url: https://inv.example.com\ncache:\n  ttl_secs: 60\n  capacity: 10\n  no_persistence: true\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.cache.ttl(), chrono::Duration::seconds(60));
    assert_eq!(config.cache.capacity, 10);
    assert!(config.cache.no_persistence);
    // untouched fields keep defaults
    assert_eq!(config.cache.min_fetch_interval_ms, 1000);
  }
}
