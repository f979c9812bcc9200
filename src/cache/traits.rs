//! Core traits and types for the partition store.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::http::Response;

/// A response read back from a partition.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  /// Partition the entry was found in
  pub partition: String,
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Durable named key→response partitions.
///
/// Keys are opaque strings (see [`crate::http::Request::cache_key`]). A write
/// to an existing key replaces the previous entry. Partitions are created by
/// [`PartitionStore::open`] or lazily by the first [`PartitionStore::put`].
pub trait PartitionStore: Send + Sync + 'static {
  /// Create the partition if it does not exist.
  fn open(&self, partition: &str) -> Result<()>;

  /// All partition names, oldest first.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Delete a partition and its entries. Returns false if it did not exist.
  fn delete(&self, partition: &str) -> Result<bool>;

  /// Store a response, replacing any entry under the same key.
  fn put(&self, partition: &str, key: &str, response: &Response) -> Result<()>;

  /// Look up a key in one partition.
  fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Look up a key across all partitions, oldest partition first.
  fn match_any(&self, key: &str) -> Result<Option<CachedResponse>>;

  /// Number of entries in a partition (0 if absent).
  fn entry_count(&self, partition: &str) -> Result<usize>;
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Read from a partition
  Cache,
  /// Produced locally because neither network nor cache could answer
  Synthesized,
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ResponseSource::Network => write!(f, "network"),
      ResponseSource::Cache => write!(f, "cache"),
      ResponseSource::Synthesized => write!(f, "synthesized"),
    }
  }
}
