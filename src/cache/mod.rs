//! Partitioned response cache with offline fallback.
//!
//! This module provides:
//! - Named partitions holding request-key → response snapshots
//! - Install-time precaching and version-based eviction of stale partitions
//! - Cache-first and network-first fetch strategies with synthesized
//!   fallbacks when both network and cache miss

mod layer;
mod partitions;
mod storage;
mod traits;

pub use layer::{CacheLayer, Served};
pub use partitions::{PartitionManager, PartitionNames, PrecacheReport};
pub use storage::SqliteStorage;
pub use traits::{CachedResponse, PartitionStore, ResponseSource};
