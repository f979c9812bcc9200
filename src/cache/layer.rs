//! Cache layer that runs the per-class fetch strategies against the network
//! and the partition store.

use color_eyre::Result;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::partitions::PartitionNames;
use super::traits::{PartitionStore, ResponseSource};
use crate::http::{url_key, Request, Response};
use crate::network::Network;

/// A response chosen by a strategy, with where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
}

impl Served {
  fn network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  fn cache(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
    }
  }

  fn synthesized(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Synthesized,
    }
  }
}

/// Fetch strategies over a shared store and network.
///
/// Store failures never fail a request: a failed read counts as a miss and a
/// failed write is logged and dropped.
pub struct CacheLayer<S: PartitionStore, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  names: PartitionNames,
  offline_route: String,
  /// Background revalidations still in flight
  pending: Mutex<JoinSet<()>>,
}

impl<S: PartitionStore, N: Network> CacheLayer<S, N> {
  pub fn new(storage: Arc<S>, network: Arc<N>, names: PartitionNames, offline_route: &str) -> Self {
    Self {
      storage,
      network,
      names,
      offline_route: offline_route.to_string(),
      pending: Mutex::new(JoinSet::new()),
    }
  }

  /// Cache-first with background revalidation.
  ///
  /// 1. Hit in any partition: return it, and if online refresh the pages
  ///    partition from a detached fetch
  /// 2. Miss: fetch, store a 200 into the pages partition, return the response
  /// 3. Network failure: cached offline page, else a synthesized 503
  ///
  /// Lookups go oldest partition first, so a route that is in the precache
  /// keeps being served from there even after a refreshed copy lands in the
  /// pages partition.
  pub async fn navigation(&self, request: &Request) -> Served {
    if let Some(cached) = self.lookup_any(request) {
      debug!(url = %request.url, "serving page from cache");
      if self.network.is_online() {
        self.revalidate(request.clone());
      }
      return Served::cache(cached);
    }

    match self.network.fetch(request).await {
      Ok(resp) => {
        self.store(&self.names.pages, request, &resp);
        Served::network(resp)
      }
      Err(e) => {
        info!(url = %request.url, error = %e, "offline and page not cached");
        match self.offline_page(request) {
          Some(page) => Served::cache(page),
          None => Served::synthesized(Response::page_unavailable()),
        }
      }
    }
  }

  /// Cache-first, never revalidated. Falls back to an empty 404.
  pub async fn static_asset(&self, request: &Request) -> Served {
    if let Some(cached) = self.lookup_any(request) {
      return Served::cache(cached);
    }

    match self.network.fetch(request).await {
      Ok(resp) => {
        self.store(&self.names.static_assets, request, &resp);
        Served::network(resp)
      }
      Err(e) => {
        info!(url = %request.url, error = %e, "asset not available offline");
        Served::synthesized(Response::asset_not_found())
      }
    }
  }

  /// Network-first with the api partition as fallback. Falls back to a 503
  /// with a JSON `{"error": "Offline"}` body.
  pub async fn api(&self, request: &Request) -> Served {
    match self.network.fetch(request).await {
      Ok(resp) => {
        self.store(&self.names.api, request, &resp);
        Served::network(resp)
      }
      Err(e) => match self.lookup(&self.names.api, request) {
        Some(cached) => {
          info!(url = %request.url, "api offline, serving from cache");
          Served::cache(cached)
        }
        None => {
          info!(url = %request.url, error = %e, "api offline, no cached response");
          Served::synthesized(Response::api_offline())
        }
      },
    }
  }

  /// Network-first with any partition as fallback and no storage. The
  /// network error is returned when nothing is cached.
  pub async fn other(&self, request: &Request) -> Result<Served> {
    match self.network.fetch(request).await {
      Ok(resp) => Ok(Served::network(resp)),
      Err(e) => match self.lookup_any(request) {
        Some(cached) => Ok(Served::cache(cached)),
        None => Err(e),
      },
    }
  }

  /// Wait for every background revalidation started so far.
  ///
  /// Hosts that shut the runtime down after answering (the CLI) call this
  /// first, otherwise the pending refreshes are cancelled.
  pub async fn drain(&self) {
    let mut pending = match self.pending.lock() {
      Ok(mut set) => std::mem::take(&mut *set),
      Err(e) => {
        warn!(error = %e, "revalidation set poisoned, nothing to drain");
        return;
      }
    };

    while let Some(result) = pending.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "background revalidation task failed");
      }
    }
  }

  /// Refresh the pages partition without holding up the caller.
  fn revalidate(&self, request: Request) {
    let storage = Arc::clone(&self.storage);
    let network = Arc::clone(&self.network);
    let partition = self.names.pages.clone();

    let task = async move {
      match network.fetch(&request).await {
        Ok(resp) => store_response(storage.as_ref(), &partition, &request, &resp),
        Err(e) => debug!(url = %request.url, error = %e, "background revalidation failed"),
      }
    };

    match self.pending.lock() {
      Ok(mut set) => {
        // Reap finished refreshes so a long-lived host does not accumulate them
        while set.try_join_next().is_some() {}
        set.spawn(task);
      }
      Err(e) => {
        warn!(error = %e, "revalidation set poisoned, running untracked");
        tokio::spawn(task);
      }
    }
  }

  fn offline_page(&self, request: &Request) -> Option<Response> {
    let url = request.url.join(&self.offline_route).ok()?;
    match self.storage.match_any(&url_key(&url)) {
      Ok(hit) => hit.map(|c| c.response),
      Err(e) => {
        warn!(url = %url, error = %e, "offline page lookup failed");
        None
      }
    }
  }

  fn lookup_any(&self, request: &Request) -> Option<Response> {
    let key = request.cache_key()?;
    match self.storage.match_any(&key) {
      Ok(hit) => hit.map(|c| c.response),
      Err(e) => {
        warn!(key = %key, error = %e, "cache lookup failed");
        None
      }
    }
  }

  fn lookup(&self, partition: &str, request: &Request) -> Option<Response> {
    let key = request.cache_key()?;
    match self.storage.get(partition, &key) {
      Ok(hit) => hit.map(|c| c.response),
      Err(e) => {
        warn!(partition, key = %key, error = %e, "cache lookup failed");
        None
      }
    }
  }

  fn store(&self, partition: &str, request: &Request, response: &Response) {
    store_response(self.storage.as_ref(), partition, request, response);
  }
}

/// Write a 200 response for a GET request; everything else is not cached.
fn store_response<S: PartitionStore>(
  storage: &S,
  partition: &str,
  request: &Request,
  response: &Response,
) {
  if !response.is_cacheable() {
    return;
  }
  let Some(key) = request.cache_key() else {
    return;
  };

  match storage.put(partition, &key, response) {
    Ok(()) => debug!(partition, key = %key, "cached response"),
    Err(e) => warn!(partition, key = %key, error = %e, "failed to cache response"),
  }
}
