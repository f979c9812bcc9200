//! Request classification.

use crate::config::ClassifierConfig;
use crate::http::{Destination, Request, RequestMode};

/// Strategy family a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// HTML page load
  Navigation,
  /// Build output, stylesheets, scripts and images
  StaticAsset,
  /// Calls to the backend API
  ApiCall,
  Other,
}

impl std::fmt::Display for RequestClass {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RequestClass::Navigation => write!(f, "navigation"),
      RequestClass::StaticAsset => write!(f, "static"),
      RequestClass::ApiCall => write!(f, "api"),
      RequestClass::Other => write!(f, "other"),
    }
  }
}

/// Pure classifier over request metadata.
#[derive(Debug, Clone)]
pub struct Classifier {
  static_prefixes: Vec<String>,
  api_prefixes: Vec<String>,
  excluded_schemes: Vec<String>,
}

impl Classifier {
  pub fn new(config: &ClassifierConfig) -> Self {
    Self {
      static_prefixes: config.static_prefixes.clone(),
      api_prefixes: config.api_prefixes.clone(),
      excluded_schemes: config
        .excluded_schemes
        .iter()
        .map(|s| s.trim_end_matches(':').to_lowercase())
        .collect(),
    }
  }

  /// Requests the controller must not touch at all (browser extensions).
  pub fn is_excluded(&self, request: &Request) -> bool {
    let scheme = request.url.scheme();
    self.excluded_schemes.iter().any(|s| s == scheme)
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    if request.destination == Destination::Document || request.mode == RequestMode::Navigate {
      return RequestClass::Navigation;
    }

    let path = request.url.path();

    if has_prefix(path, &self.static_prefixes)
      || matches!(
        request.destination,
        Destination::Style | Destination::Script | Destination::Image
      )
    {
      return RequestClass::StaticAsset;
    }

    if has_prefix(path, &self.api_prefixes) {
      return RequestClass::ApiCall;
    }

    RequestClass::Other
  }
}

impl Default for Classifier {
  fn default() -> Self {
    Self::new(&ClassifierConfig::default())
  }
}

fn has_prefix(path: &str, prefixes: &[String]) -> bool {
  prefixes.iter().any(|p| path.starts_with(p.as_str()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn get(s: &str) -> Request {
    Request::get(Url::parse(s).unwrap())
  }

  #[test]
  fn test_navigation_by_mode_or_destination() {
    let c = Classifier::default();
    assert_eq!(
      c.classify(&Request::navigate(Url::parse("http://localhost:3000/dashboard").unwrap())),
      RequestClass::Navigation
    );
    assert_eq!(
      c.classify(&get("http://localhost:3000/x").with_destination(Destination::Document)),
      RequestClass::Navigation
    );
    assert_eq!(
      c.classify(&get("http://localhost:3000/x").with_mode(RequestMode::Navigate)),
      RequestClass::Navigation
    );
  }

  #[test]
  fn test_navigation_wins_over_api_prefix() {
    let c = Classifier::default();
    let req = Request::navigate(Url::parse("http://localhost:3000/api/pedidos").unwrap());
    assert_eq!(c.classify(&req), RequestClass::Navigation);
  }

  #[test]
  fn test_static_assets() {
    let c = Classifier::default();
    assert_eq!(
      c.classify(&get("http://localhost:3000/_next/static/chunks/main.js")),
      RequestClass::StaticAsset
    );
    for dest in [Destination::Style, Destination::Script, Destination::Image] {
      assert_eq!(
        c.classify(&get("http://cdn.example.com/logo").with_destination(dest)),
        RequestClass::StaticAsset
      );
    }
  }

  #[test]
  fn test_api_and_other() {
    let c = Classifier::default();
    assert_eq!(
      c.classify(&get("http://localhost:3000/api/sankhya/pedidos")),
      RequestClass::ApiCall
    );
    assert_eq!(
      c.classify(&get("http://localhost:3000/manifest.json")),
      RequestClass::Other
    );
    assert_eq!(
      c.classify(&get("http://localhost:3000/fonts/a.woff2").with_destination(Destination::Font)),
      RequestClass::Other
    );
  }

  #[test]
  fn test_extension_scheme_excluded() {
    let c = Classifier::default();
    assert!(c.is_excluded(&get("chrome-extension://abcdef/content.js")));
    assert!(!c.is_excluded(&get("http://localhost:3000/")));
  }
}
