//! Partition naming, install-time precaching and activation-time eviction.

use color_eyre::Result;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::traits::PartitionStore;
use crate::config::CacheConfig;
use crate::http::{url_key, Request};
use crate::network::Network;

/// Names of the partitions owned by one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
  /// Prefix shared by all versioned precache partitions
  pub namespace: String,
  pub version: String,
  pub pages: String,
  pub static_assets: String,
  pub api: String,
}

impl PartitionNames {
  pub fn new(config: &CacheConfig) -> Self {
    Self {
      namespace: config.namespace.clone(),
      version: config.version.clone(),
      pages: config.pages.clone(),
      static_assets: config.static_assets.clone(),
      api: config.api.clone(),
    }
  }

  /// Versioned precache partition name, e.g. `offline-app-v2`.
  pub fn precache(&self) -> String {
    self.precache_for(&self.version)
  }

  pub fn precache_for(&self, version: &str) -> String {
    format!("{}{}", self.namespace, version)
  }
}

/// Outcome of precaching the route list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecacheReport {
  pub stored: usize,
  pub failed: usize,
}

/// Owns partition lifecycle on top of a [`PartitionStore`].
pub struct PartitionManager<S: PartitionStore> {
  storage: Arc<S>,
  names: PartitionNames,
}

impl<S: PartitionStore> PartitionManager<S> {
  pub fn new(storage: Arc<S>, names: PartitionNames) -> Self {
    Self { storage, names }
  }

  pub fn names(&self) -> &PartitionNames {
    &self.names
  }

  /// Fetch every route into the precache partition.
  ///
  /// Best effort: a route that fails to fetch or answers with anything but
  /// 200 is logged and skipped, and the remaining routes are still stored.
  pub async fn ensure_precache<N: Network>(
    &self,
    network: &N,
    routes: &[Url],
  ) -> Result<PrecacheReport> {
    let partition = self.names.precache();
    self.storage.open(&partition)?;
    info!(partition = %partition, routes = routes.len(), "precaching routes");

    let requests: Vec<Request> = routes.iter().cloned().map(Request::get).collect();
    let results = join_all(requests.iter().map(|req| network.fetch(req))).await;

    let mut report = PrecacheReport::default();
    for (url, result) in routes.iter().zip(results) {
      match result {
        Ok(resp) if resp.is_cacheable() => {
          match self.storage.put(&partition, &url_key(url), &resp) {
            Ok(()) => {
              debug!(url = %url, "precached");
              report.stored += 1;
            }
            Err(e) => {
              warn!(url = %url, error = %e, "failed to store precached route");
              report.failed += 1;
            }
          }
        }
        Ok(resp) => {
          warn!(url = %url, status = resp.status, "precache route returned non-200");
          report.failed += 1;
        }
        Err(e) => {
          warn!(url = %url, error = %e, "precache route unreachable");
          report.failed += 1;
        }
      }
    }

    info!(
      stored = report.stored,
      failed = report.failed,
      "precache finished"
    );
    Ok(report)
  }

  /// Delete every namespaced partition whose version is not `current_version`.
  ///
  /// Returns the deleted names. Partitions outside the namespace (pages,
  /// static, api) are never touched.
  pub fn evict_stale(&self, current_version: &str) -> Result<Vec<String>> {
    let current = self.names.precache_for(current_version);
    let mut deleted = Vec::new();

    for name in self.storage.partitions()? {
      if name != current && name.starts_with(&self.names.namespace) {
        info!(partition = %name, "removing stale cache partition");
        if self.storage.delete(&name)? {
          deleted.push(name);
        }
      }
    }

    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::http::Response;
  use crate::testing::FakeNetwork;

  fn manager() -> (Arc<SqliteStorage>, PartitionManager<SqliteStorage>) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let names = PartitionNames::new(&CacheConfig::default());
    (Arc::clone(&storage), PartitionManager::new(storage, names))
  }

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_precache_name_is_versioned() {
    let names = PartitionNames::new(&CacheConfig::default());
    assert_eq!(names.precache(), "offline-app-v2");
    assert_eq!(names.precache_for("v1"), "offline-app-v1");
  }

  #[tokio::test]
  async fn test_precache_survives_one_failed_route() {
    let (storage, manager) = manager();
    let network = FakeNetwork::new();
    network.respond("http://localhost:3000/", Response::new(200, "home"));
    network.fail("http://localhost:3000/dashboard");

    let routes = vec![
      url("http://localhost:3000/"),
      url("http://localhost:3000/dashboard"),
    ];
    let report = manager.ensure_precache(&network, &routes).await.unwrap();

    assert_eq!(report, PrecacheReport { stored: 1, failed: 1 });
    assert_eq!(storage.entry_count("offline-app-v2").unwrap(), 1);
    assert!(storage
      .get("offline-app-v2", "http://localhost:3000/")
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_precache_skips_non_200() {
    let (storage, manager) = manager();
    let network = FakeNetwork::new();
    network.respond("http://localhost:3000/", Response::new(500, "boom"));

    let report = manager
      .ensure_precache(&network, &[url("http://localhost:3000/")])
      .await
      .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(storage.entry_count("offline-app-v2").unwrap(), 0);
    assert!(storage.partitions().unwrap().contains(&"offline-app-v2".to_string()));
  }

  #[test]
  fn test_evict_stale_keeps_current_and_fixed_partitions() {
    let (storage, manager) = manager();
    let key = "http://localhost:3000/";
    storage.put("offline-app-v1", key, &Response::new(200, "old")).unwrap();
    storage.put("offline-app-v2", key, &Response::new(200, "new")).unwrap();
    storage.put("pages-cache", key, &Response::new(200, "page")).unwrap();

    let deleted = manager.evict_stale("v2").unwrap();

    assert_eq!(deleted, vec!["offline-app-v1".to_string()]);
    let remaining = storage.partitions().unwrap();
    assert!(!remaining.contains(&"offline-app-v1".to_string()));
    assert!(remaining.contains(&"offline-app-v2".to_string()));
    assert!(remaining.contains(&"pages-cache".to_string()));
    assert_eq!(storage.entry_count("offline-app-v2").unwrap(), 1);
  }

  #[test]
  fn test_evict_stale_is_idempotent() {
    let (storage, manager) = manager();
    storage.open("offline-app-v1").unwrap();
    storage.open("offline-app-v2").unwrap();

    assert_eq!(manager.evict_stale("v2").unwrap().len(), 1);
    assert!(manager.evict_stale("v2").unwrap().is_empty());
    assert_eq!(storage.partitions().unwrap(), vec!["offline-app-v2".to_string()]);
  }
}
