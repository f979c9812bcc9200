//! Test doubles shared by the unit tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::{CachedResponse, PartitionStore};
use crate::http::{url_key, Request, Response};
use crate::network::Network;
use crate::sync::{ClientId, Clients, SyncMessage};

/// Scripted network: each URL either answers with a fixed response or fails.
/// Unscripted URLs fail as if the host were unreachable.
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Option<Response>>>,
  online: AtomicBool,
  calls: AtomicUsize,
  delay: Mutex<Duration>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      online: AtomicBool::new(true),
      calls: AtomicUsize::new(0),
      delay: Mutex::new(Duration::ZERO),
    }
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Some(response));
  }

  pub fn fail(&self, url: &str) {
    self.routes.lock().unwrap().insert(url.to_string(), None);
  }

  /// Offline makes every fetch fail and reports no connectivity.
  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Hold every response back by `delay` before answering.
  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = delay;
  }

  /// Number of fetches attempted so far.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    if !self.is_online() {
      return Err(eyre!("Network unavailable: offline"));
    }

    let delay = *self.delay.lock().unwrap();
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }

    let key = url_key(&request.url);
    let scripted = self.routes.lock().unwrap().get(&key).cloned();
    match scripted {
      Some(Some(resp)) => Ok(resp),
      Some(None) => Err(eyre!("Connection refused: {}", key)),
      None => Err(eyre!("No route to {}", key)),
    }
  }

  fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }
}

/// Store whose every operation fails, as a locked or corrupt database would.
pub struct BrokenStorage;

impl PartitionStore for BrokenStorage {
  fn open(&self, partition: &str) -> Result<()> {
    Err(eyre!("Failed to open partition {}: database is locked", partition))
  }

  fn partitions(&self) -> Result<Vec<String>> {
    Err(eyre!("Failed to list partitions: database is locked"))
  }

  fn delete(&self, partition: &str) -> Result<bool> {
    Err(eyre!("Failed to delete partition {}: database is locked", partition))
  }

  fn put(&self, partition: &str, _key: &str, _response: &Response) -> Result<()> {
    Err(eyre!("Failed to store in {}: database is locked", partition))
  }

  fn get(&self, partition: &str, _key: &str) -> Result<Option<CachedResponse>> {
    Err(eyre!("Failed to look up in {}: database is locked", partition))
  }

  fn match_any(&self, _key: &str) -> Result<Option<CachedResponse>> {
    Err(eyre!("Failed to look up: database is locked"))
  }

  fn entry_count(&self, partition: &str) -> Result<usize> {
    Err(eyre!("Failed to count entries in {}: database is locked", partition))
  }
}

/// Client registry that cannot be enumerated or claimed.
pub struct UnreachableClients;

impl Clients for UnreachableClients {
  fn match_all(&self) -> Result<Vec<ClientId>> {
    Err(eyre!("Client registry unavailable"))
  }

  fn post_message(&self, client: ClientId, _message: &SyncMessage) -> Result<()> {
    Err(eyre!("Client {} unreachable", client))
  }

  fn claim(&self) -> Result<usize> {
    Err(eyre!("Client registry unavailable"))
  }
}
