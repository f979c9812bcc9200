//! Network access used by the fetch strategies.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::http::{Request, Response};

/// Something that can perform a request over the network.
///
/// An `Err` means the request never produced a response (connection refused,
/// DNS failure, timeout, offline). Any HTTP status, including 4xx and 5xx, is
/// an `Ok` response.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;

  /// Whether connectivity is currently reported as available.
  fn is_online(&self) -> bool;
}

/// reqwest-backed network.
pub struct HttpNetwork {
  client: reqwest::Client,
  online: AtomicBool,
}

impl HttpNetwork {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = config.timeout_secs {
      builder = builder.timeout(Duration::from_secs(secs));
    }
    if let Some(agent) = &config.user_agent {
      builder = builder.user_agent(agent.clone());
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      online: AtomicBool::new(true),
    })
  }

  /// Force the network into offline mode; every fetch then fails immediately.
  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    if !self.is_online() {
      return Err(eyre!("Network unavailable: offline"));
    }

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let resp = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    let status = resp.status();
    let headers = resp
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = resp
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body from {}: {}", request.url, e))?;

    debug!(url = %request.url, status = status.as_u16(), "network response");

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    })
  }

  fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }
}
