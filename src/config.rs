use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;
use url::Url;

/// Environment variable that overrides `cache.version`.
pub const CACHE_VERSION_ENV: &str = "SWCACHE_CACHE_VERSION";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the precache routes are resolved against
  #[serde(default = "default_origin")]
  pub origin: String,
  /// SQLite database path (defaults to $XDG_DATA_HOME/swcache/cache.db)
  pub database: Option<PathBuf>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub classifier: ClassifierConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Bump on every deploy to evict the previous precache
  pub version: String,
  /// Prefix shared by every versioned precache partition
  pub namespace: String,
  /// Page paths fetched into the precache at install
  pub routes: Vec<String>,
  /// Page served to navigations that are neither cached nor reachable
  pub offline_route: String,
  pub pages: String,
  pub static_assets: String,
  pub api: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    let routes = [
      "/",
      "/dashboard",
      "/dashboard/parceiros",
      "/dashboard/produtos",
      "/dashboard/leads",
      "/dashboard/pedidos",
      "/dashboard/financeiro",
      "/dashboard/calendario",
      "/dashboard/chat",
      "/dashboard/analise",
      "/dashboard/equipe",
      "/dashboard/usuarios",
      "/dashboard/configuracoes",
      "/offline",
    ];

    Self {
      version: "v2".to_string(),
      namespace: "offline-app-".to_string(),
      routes: routes.iter().map(|r| r.to_string()).collect(),
      offline_route: "/offline".to_string(),
      pages: "pages-cache".to_string(),
      static_assets: "static-cache".to_string(),
      api: "api-cache".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
  /// Path prefixes of content-hashed build output
  pub static_prefixes: Vec<String>,
  pub api_prefixes: Vec<String>,
  /// URL schemes that are never intercepted
  pub excluded_schemes: Vec<String>,
}

impl Default for ClassifierConfig {
  fn default() -> Self {
    Self {
      static_prefixes: vec!["/_next/".to_string()],
      api_prefixes: vec!["/api/".to_string()],
      excluded_schemes: vec!["chrome-extension".to_string()],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Background sync tag that triggers client notification
  pub tag: String,
  /// `type` field of the posted message
  pub message_type: String,
  pub message: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "sync-pedidos".to_string(),
      message_type: "SYNC_PEDIDOS".to_string(),
      message: "Starting pending order synchronization".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Per-request timeout; no timeout when unset
  pub timeout_secs: Option<u64>,
  pub user_agent: Option<String>,
}

fn default_origin() -> String {
  "http://localhost:3000".to_string()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      database: None,
      cache: CacheConfig::default(),
      classifier: ClassifierConfig::default(),
      sync: SyncConfig::default(),
      network: NetworkConfig::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
  ///
  /// Built-in defaults are used when no file is found. `SWCACHE_CACHE_VERSION`
  /// overrides the cache version in every case.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        info!("No configuration file found, using defaults");
        Self::default()
      }
    };

    Ok(config.with_env_overrides())
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.origin_url()?;
    Ok(config)
  }

  fn with_env_overrides(mut self) -> Self {
    if let Ok(version) = std::env::var(CACHE_VERSION_ENV) {
      if !version.trim().is_empty() {
        self.cache.version = version.trim().to_string();
      }
    }
    self
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Precache routes resolved against the origin, in configured order.
  pub fn precache_urls(&self) -> Result<Vec<Url>> {
    let origin = self.origin_url()?;
    self
      .cache
      .routes
      .iter()
      .map(|route| {
        origin
          .join(route)
          .map_err(|e| eyre!("Invalid precache route '{}': {}", route, e))
      })
      .collect()
  }

  /// Database path, falling back to the platform data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }
    Ok(data_dir()?.join("cache.db"))
  }
}

/// Per-user data directory for the database and logs.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("swcache"))
}
