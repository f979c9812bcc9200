//! Background sync: tell connected clients to resume their pending writes.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;

/// Identifier of a connected UI client.
pub type ClientId = u64;

/// Message posted to every client when the sync tag fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncMessage {
  #[serde(rename = "type")]
  pub kind: String,
  pub message: String,
}

/// The set of UI clients the controller can reach.
pub trait Clients: Send + Sync + 'static {
  /// Clients currently connected.
  fn match_all(&self) -> Result<Vec<ClientId>>;

  /// Deliver a message without waiting for the client to handle it.
  fn post_message(&self, client: ClientId, message: &SyncMessage) -> Result<()>;

  /// Take control of every open client. Returns how many were claimed.
  fn claim(&self) -> Result<usize>;
}

/// In-process clients backed by unbounded channels.
#[derive(Default)]
pub struct ChannelClients {
  senders: Mutex<BTreeMap<ClientId, mpsc::UnboundedSender<SyncMessage>>>,
  next_id: AtomicU64,
}

impl ChannelClients {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a new client and return the receiving end of its inbox.
  pub fn connect(&self) -> Result<(ClientId, mpsc::UnboundedReceiver<SyncMessage>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);

    self
      .senders
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .insert(id, tx);

    Ok((id, rx))
  }
}

impl Clients for ChannelClients {
  fn match_all(&self) -> Result<Vec<ClientId>> {
    let mut senders = self
      .senders
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Receivers that were dropped are clients that went away
    senders.retain(|_, tx| !tx.is_closed());
    Ok(senders.keys().copied().collect())
  }

  fn post_message(&self, client: ClientId, message: &SyncMessage) -> Result<()> {
    let mut senders = self
      .senders
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = senders
      .get(&client)
      .ok_or_else(|| eyre!("Client {} is not connected", client))?;

    if tx.send(message.clone()).is_err() {
      senders.remove(&client);
      return Err(eyre!("Client {} disconnected", client));
    }

    Ok(())
  }

  fn claim(&self) -> Result<usize> {
    Ok(self.match_all()?.len())
  }
}

/// Fans the sync notification out to all clients. Delivery is best effort
/// and at most once: nothing is queued for clients that are not connected.
pub struct SyncCoordinator<C: Clients> {
  clients: Arc<C>,
  tag: String,
  message: SyncMessage,
}

impl<C: Clients> SyncCoordinator<C> {
  pub fn new(clients: Arc<C>, config: &SyncConfig) -> Self {
    Self {
      clients,
      tag: config.tag.clone(),
      message: SyncMessage {
        kind: config.message_type.clone(),
        message: config.message.clone(),
      },
    }
  }

  /// Handle a sync event. Returns the number of clients notified; errors are
  /// logged and never reach the host.
  pub fn on_sync(&self, tag: &str) -> usize {
    info!(tag, "background sync");

    if tag != self.tag {
      debug!(tag, "ignoring unknown sync tag");
      return 0;
    }

    let clients = match self.clients.match_all() {
      Ok(clients) => clients,
      Err(e) => {
        error!(error = %e, "failed to enumerate clients for sync");
        return 0;
      }
    };

    let mut notified = 0;
    for client in clients {
      match self.clients.post_message(client, &self.message) {
        Ok(()) => notified += 1,
        Err(e) => warn!(client, error = %e, "failed to notify client"),
      }
    }

    info!(notified, "clients notified to resume pending writes");
    notified
  }
}
