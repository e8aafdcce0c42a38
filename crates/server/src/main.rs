use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use siloflow_core::{
    load_config, validate_config, FsObjectStore, HttpFetcher, ObjectStore, SourceFetcher,
    SqliteWarehouse, Warehouse,
};
use siloflow_server::api::create_router;
use siloflow_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");
/// How long cancelled runs get to reach a checkpoint and record their summary.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging; SILOFLOW_LOG_FORMAT=json switches to JSON lines
    let json_logs = std::env::var("SILOFLOW_LOG_FORMAT").is_ok_and(|f| f == "json");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("siloflow v{}", VERSION);

    let config_path = std::env::var("SILOFLOW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!(
        "{} sources ({} active), {} views",
        config.sources.len(),
        config.active_sources().count(),
        config.views.len()
    );

    let store = Arc::new(FsObjectStore::new(&config.storage.root, &config.storage.bucket));
    info!("Staging bucket at {:?}", store.bucket_dir());

    let warehouse = SqliteWarehouse::new(
        &config.warehouse.path,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
    )
    .with_context(|| format!("Failed to open warehouse at {:?}", config.warehouse.path))?;
    info!("Warehouse at {:?}", config.warehouse.path);

    let fetcher = HttpFetcher::new(&config.fetcher).context("Failed to create HTTP fetcher")?;

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let state = Arc::new(AppState::new(
        config,
        Arc::new(fetcher) as Arc<dyn SourceFetcher>,
        store as Arc<dyn ObjectStore>,
        Arc::new(warehouse) as Arc<dyn Warehouse>,
    ));

    let app = create_router(Arc::clone(&state));

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    let stopped = state.runs().stop_all().await;
    if !stopped.is_empty() {
        info!("Requested stop of {} active run(s)", stopped.len());
        let pending = state.runs().wait_idle(SHUTDOWN_GRACE).await;
        if pending.is_empty() {
            info!("All runs stopped");
        } else {
            warn!(
                "Abandoning {} run(s) still active after {:?}",
                pending.len(),
                SHUTDOWN_GRACE
            );
        }
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
