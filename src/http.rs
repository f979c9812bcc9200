//! Request and response snapshots exchanged between the host, the network and
//! the partition store.

use clap::ValueEnum;
use reqwest::Method;
use url::Url;

/// What the request is fetched for, as declared by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Destination {
  /// Top-level HTML document
  Document,
  Style,
  Script,
  Image,
  Font,
  /// fetch()/XHR calls carry no destination
  #[default]
  Empty,
}

/// Request mode as declared by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum RequestMode {
  Navigate,
  SameOrigin,
  NoCors,
  #[default]
  Cors,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  /// A plain GET with no destination, as issued by fetch().
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      destination: Destination::Empty,
      mode: RequestMode::Cors,
      headers: Vec::new(),
      body: None,
    }
  }

  /// A top-level page load.
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Key under which the response to this request is stored.
  ///
  /// Partitions only hold GET responses, so any other method has no key and
  /// never hits or populates a partition. The fragment is not part of the key.
  pub fn cache_key(&self) -> Option<String> {
    if self.method != Method::GET {
      return None;
    }
    Some(url_key(&self.url))
  }
}

/// Parse a `Name: value` header as given on the command line.
pub fn parse_header(s: &str) -> Result<(String, String), String> {
  let (name, value) = s
    .split_once(':')
    .ok_or_else(|| format!("expected 'Name: value', got '{}'", s))?;
  let name = name.trim();
  if name.is_empty() {
    return Err(format!("missing header name in '{}'", s));
  }
  Ok((name.to_string(), value.trim().to_string()))
}

/// Cache key for a URL: the URL with its fragment removed.
pub fn url_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.into()
}

/// A fully buffered response.
///
/// Bodies are owned bytes, so handing one copy to the store and another to
/// the caller is a plain `clone()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    let status_text = reqwest::StatusCode::from_u16(status)
      .ok()
      .and_then(|s| s.canonical_reason())
      .unwrap_or_default()
      .to_string();

    Self {
      status,
      status_text,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// First header value matching `name` (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Only plain 200 responses are ever written to a partition.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  /// Returned for a navigation when neither the page nor the offline page
  /// is available.
  pub fn page_unavailable() -> Self {
    Self::new(503, "Offline - page not available").with_header("Content-Type", "text/plain")
  }

  /// Returned for a static asset that is neither cached nor reachable.
  pub fn asset_not_found() -> Self {
    Self::new(404, Vec::new())
  }

  /// Returned for an API call that is neither reachable nor cached.
  pub fn api_offline() -> Self {
    let body = serde_json::json!({ "error": "Offline" }).to_string();
    Self::new(503, body).with_header("Content-Type", "application/json")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_cache_key_strips_fragment() {
    let req = Request::get(url("http://localhost:3000/dashboard?tab=1#top"));
    assert_eq!(
      req.cache_key().as_deref(),
      Some("http://localhost:3000/dashboard?tab=1")
    );
  }

  #[test]
  fn test_cache_key_only_for_get() {
    let req = Request::get(url("http://localhost:3000/api/pedidos")).with_method(Method::POST);
    assert_eq!(req.cache_key(), None);
  }

  #[test]
  fn test_with_header_appends() {
    let req = Request::get(url("http://localhost:3000/api/pedidos"))
      .with_header("Authorization", "Bearer abc")
      .with_header("Accept", "application/json");
    assert_eq!(
      req.headers,
      vec![
        ("Authorization".to_string(), "Bearer abc".to_string()),
        ("Accept".to_string(), "application/json".to_string()),
      ]
    );
  }

  #[test]
  fn test_parse_header() {
    assert_eq!(
      parse_header("Authorization: Bearer a:b").unwrap(),
      ("Authorization".to_string(), "Bearer a:b".to_string())
    );
    assert_eq!(
      parse_header("X-Empty:").unwrap(),
      ("X-Empty".to_string(), String::new())
    );
    assert!(parse_header("no-colon").is_err());
    assert!(parse_header(" : value").is_err());
  }

  #[test]
  fn test_api_offline_body() {
    let resp = Response::api_offline();
    assert_eq!(resp.status, 503);
    assert_eq!(resp.header("content-type"), Some("application/json"));

    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body, serde_json::json!({ "error": "Offline" }));
  }

  #[test]
  fn test_asset_not_found_is_empty() {
    let resp = Response::asset_not_found();
    assert_eq!(resp.status, 404);
    assert!(resp.body.is_empty());
    assert_eq!(resp.status_text, "Not Found");
  }

  #[test]
  fn test_only_200_is_cacheable() {
    assert!(Response::new(200, "ok").is_cacheable());
    assert!(!Response::new(204, "").is_cacheable());
    assert!(!Response::new(301, "").is_cacheable());
    assert!(!Response::new(404, "").is_cacheable());
    assert!(!Response::new(500, "").is_cacheable());
  }
}
