//! The offline controller: install, activate, fetch and sync hooks over
//! injected store, network and client collaborators.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{
  CacheLayer, PartitionManager, PartitionNames, PartitionStore, PrecacheReport, ResponseSource,
};
use crate::classify::{Classifier, RequestClass};
use crate::config::Config;
use crate::http::{Request, Response};
use crate::network::Network;
use crate::sync::{Clients, SyncCoordinator};

/// Lifecycle of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  /// Ready to intercept requests
  Activated,
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      WorkerState::Parsed => write!(f, "parsed"),
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Activated => write!(f, "activated"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub precache: PrecacheReport,
  /// Activate right away instead of waiting for old clients to close
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
  /// Stale partitions that were deleted
  pub evicted: Vec<String>,
  /// Clients now controlled
  pub claimed: usize,
}

/// What the host should do with an intercepted request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Not handled; the host performs its default network request
  PassThrough,
  Respond {
    response: Response,
    source: ResponseSource,
  },
}

/// Offline cache controller.
pub struct Controller<S: PartitionStore, N: Network, C: Clients> {
  state: RwLock<WorkerState>,
  classifier: Classifier,
  partitions: PartitionManager<S>,
  layer: CacheLayer<S, N>,
  sync: SyncCoordinator<C>,
  network: Arc<N>,
  clients: Arc<C>,
  routes: Vec<Url>,
}

impl<S: PartitionStore, N: Network, C: Clients> Controller<S, N, C> {
  pub fn new(config: &Config, storage: Arc<S>, network: Arc<N>, clients: Arc<C>) -> Result<Self> {
    let names = PartitionNames::new(&config.cache);

    Ok(Self {
      state: RwLock::new(WorkerState::Parsed),
      classifier: Classifier::new(&config.classifier),
      partitions: PartitionManager::new(Arc::clone(&storage), names.clone()),
      layer: CacheLayer::new(
        storage,
        Arc::clone(&network),
        names,
        &config.cache.offline_route,
      ),
      sync: SyncCoordinator::new(Arc::clone(&clients), &config.sync),
      network,
      clients,
      routes: config.precache_urls()?,
    })
  }

  pub async fn state(&self) -> WorkerState {
    *self.state.read().await
  }

  /// Move to `state`, returning the state it replaced.
  async fn set_state(&self, state: WorkerState) -> WorkerState {
    let mut current = self.state.write().await;
    let from = *current;
    debug!(%from, to = %state, "worker state");
    *current = state;
    from
  }

  /// Undo a transition whose hook failed part way.
  async fn restore_state(&self, previous: WorkerState, err: &color_eyre::Report) {
    error!(state = %previous, error = %err, "lifecycle hook failed, restoring state");
    self.set_state(previous).await;
  }

  /// Precache the configured routes. Individual route failures do not fail
  /// the install.
  pub async fn on_install(&self) -> Result<InstallReport> {
    let previous = self.set_state(WorkerState::Installing).await;
    let precache = match self
      .partitions
      .ensure_precache(self.network.as_ref(), &self.routes)
      .await
    {
      Ok(report) => report,
      Err(e) => {
        self.restore_state(previous, &e).await;
        return Err(e);
      }
    };
    self.set_state(WorkerState::Installed).await;

    Ok(InstallReport {
      precache,
      skip_waiting: true,
    })
  }

  /// Evict stale partitions, then claim clients. Requests are intercepted
  /// only after both steps complete.
  pub async fn on_activate(&self) -> Result<ActivateReport> {
    let previous = self.set_state(WorkerState::Activating).await;

    let version = self.partitions.names().version.clone();
    let steps = self
      .partitions
      .evict_stale(&version)
      .and_then(|evicted| Ok((evicted, self.clients.claim()?)));
    let (evicted, claimed) = match steps {
      Ok(done) => done,
      Err(e) => {
        self.restore_state(previous, &e).await;
        return Err(e);
      }
    };

    self.set_state(WorkerState::Activated).await;
    info!(evicted = evicted.len(), claimed, "controller activated");

    Ok(ActivateReport { evicted, claimed })
  }

  /// Route a request through the strategy for its class.
  ///
  /// Only the `Other` class can return an error: its network failure is
  /// propagated when no partition has the request.
  pub async fn on_fetch(&self, request: Request) -> Result<FetchOutcome> {
    if self.classifier.is_excluded(&request) {
      return Ok(FetchOutcome::PassThrough);
    }

    let state = self.state().await;
    if state != WorkerState::Activated {
      debug!(url = %request.url, %state, "not active, passing request through");
      return Ok(FetchOutcome::PassThrough);
    }

    let class = self.classifier.classify(&request);
    debug!(url = %request.url, %class, "intercepted request");

    let served = match class {
      RequestClass::Navigation => self.layer.navigation(&request).await,
      RequestClass::StaticAsset => self.layer.static_asset(&request).await,
      RequestClass::ApiCall => self.layer.api(&request).await,
      RequestClass::Other => match self.layer.other(&request).await {
        Ok(served) => served,
        Err(e) => {
          warn!(url = %request.url, error = %e, "request failed with no cached copy");
          return Err(e);
        }
      },
    };

    Ok(FetchOutcome::Respond {
      response: served.response,
      source: served.source,
    })
  }

  /// Wait for background page refreshes to finish. Responses never wait on
  /// them; call this before shutting the runtime down.
  pub async fn drain(&self) {
    self.layer.drain().await;
  }

  /// Notify clients when the configured sync tag fires. Never fails.
  pub fn on_sync(&self, tag: &str) -> usize {
    self.sync.on_sync(tag)
  }
}
