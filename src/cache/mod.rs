//! Client-side data-freshness layer: a TTL cache with durable backing.
//!
//! - Entries carry `written_at` + `ttl`; expiry is lazy, checked at read time
//! - Capacity eviction (oldest written first) runs as a side effect of `set`
//! - The persisted snapshot is a best-effort mirror; memory always wins
//! - Persistence failures degrade the cache to memory-only, never the caller

mod storage;
mod store;

pub use storage::{NoopStorage, SnapshotStorage, SqliteStorage};
pub use store::{CacheEntry, CacheStats, EntryStats, TtlCache};
