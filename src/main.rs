//! Optics Server
//!
//! Run with: cargo run --bin optics
//!
//! Loads the configuration, rebuilds every persisted bucket, starts the
//! ingest drain loop and the retention sweep, and serves the HTTP API until
//! Ctrl+C or SIGTERM.
//!
//! # Configuration
//!
//! See `optics-cli config` for an annotated config file. Environment
//! variables (`OPTICS_*`) override the file, and flags override both.
//! `RUST_LOG` overrides the configured log level.

use clap::Parser;
use optics::api::{serve, ApiConfig, AppState};
use optics::config::{Config, LoggingConfig, StoreBackend};
use optics::service::OpticsService;
use optics::storage::open_store;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "optics")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Telemetry event store with a bitmap-indexed query engine")]
struct Args {
    /// Config file (default: search the standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(long)]
    data_dir: Option<String>,

    /// Keep everything in memory
    #[arg(long)]
    memory: bool,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }
    if args.memory {
        config.storage.backend = StoreBackend::Memory;
    }
    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }

    init_tracing(&config.logging);
    tracing::info!("Starting Optics v{}", env!("CARGO_PKG_VERSION"));

    // Rebuild persisted buckets before serving
    let store = open_store(&config.storage)?;
    let service = Arc::new(OpticsService::open(store, config.optics.clone()).await?);
    tracing::info!(
        buckets = service.set().bucket_count().await,
        events = service.set().total_events().await,
        "Event store ready"
    );

    let drain_handle = service.start_background_drain();
    let sweep_handle = service.start_retention_sweep();

    let api_config = ApiConfig::from(&config.api);
    let state = AppState::new(Arc::clone(&service), api_config.clone());
    let result = serve(state, &api_config).await;

    // Shutdown
    tracing::info!("Shutting down...");
    service.shutdown().await;
    sweep_handle.abort();
    if let Err(e) = drain_handle.await {
        tracing::error!("Drain loop ended abnormally: {}", e);
    }

    result?;
    tracing::info!("Optics shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("optics={},tower_http=info", logging.level))
    });
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
