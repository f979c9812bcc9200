use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

use swcache::cache::{PartitionStore, SqliteStorage};
use swcache::config::{self, Config};
use swcache::http::{parse_header, Destination, Request, RequestMode};
use swcache::network::HttpNetwork;
use swcache::sync::ChannelClients;
use swcache::{Controller, FetchOutcome};

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "Offline cache and background-sync controller for the pedidos dashboard")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the configured routes, then activate
  Install,
  /// Evict stale partitions and claim clients
  Activate,
  /// Intercept a single request and print the response
  Fetch {
    url: Url,
    #[arg(long, value_enum, default_value_t = Destination::Empty)]
    destination: Destination,
    #[arg(long, value_enum, default_value_t = RequestMode::Cors)]
    mode: RequestMode,
    #[arg(long, default_value = "GET")]
    method: String,
    /// Request header as 'Name: value' (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
    /// Request body
    #[arg(long)]
    body: Option<String>,
    /// Treat the network as unavailable
    #[arg(long)]
    offline: bool,
  },
  /// Fire a background sync event
  Sync { tag: String },
  /// List partitions and their entry counts
  Partitions,
}

type CliController = Controller<SqliteStorage, HttpNetwork, ChannelClients>;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_logging()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);
  let network = Arc::new(HttpNetwork::new(&config.network)?);
  let clients = Arc::new(ChannelClients::new());
  let controller: CliController = Controller::new(
    &config,
    Arc::clone(&storage),
    Arc::clone(&network),
    Arc::clone(&clients),
  )?;

  match args.command {
    Command::Install => {
      let report = controller.on_install().await?;
      println!(
        "precached {} route(s), {} failed",
        report.precache.stored, report.precache.failed
      );
      if report.skip_waiting {
        print_activation(&controller).await?;
      }
    }
    Command::Activate => print_activation(&controller).await?,
    Command::Fetch {
      url,
      destination,
      mode,
      method,
      headers,
      body,
      offline,
    } => {
      network.set_online(!offline);
      controller.on_activate().await?;

      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let mut request = Request::get(url)
        .with_method(method)
        .with_destination(destination)
        .with_mode(mode);
      for (name, value) in &headers {
        request = request.with_header(name, value);
      }
      if let Some(body) = body {
        request = request.with_body(body);
      }

      match controller.on_fetch(request).await? {
        FetchOutcome::PassThrough => println!("passed through (not intercepted)"),
        FetchOutcome::Respond { response, source } => {
          eprintln!("{} {} ({})", response.status, response.status_text, source);
          std::io::stdout().write_all(&response.body)?;
        }
      }
      controller.drain().await;
    }
    Command::Sync { tag } => {
      let (_, mut inbox) = clients.connect()?;
      let notified = controller.on_sync(&tag);
      println!("notified {} client(s)", notified);
      while let Ok(message) = inbox.try_recv() {
        println!("{}", serde_json::to_string(&message)?);
      }
    }
    Command::Partitions => {
      for name in storage.partitions()? {
        println!("{}\t{}", name, storage.entry_count(&name)?);
      }
    }
  }

  Ok(())
}

async fn print_activation(controller: &CliController) -> Result<()> {
  let report = controller.on_activate().await?;
  for name in &report.evicted {
    println!("evicted {}", name);
  }
  println!("activated, {} client(s) claimed", report.claimed);
  Ok(())
}

/// Log to a daily file under the data directory; stdout carries command output.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = config::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "swcache.log"));

  let filter = EnvFilter::try_from_env("SWCACHE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
