use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bookbag_core::{
    dispatch::{DownloadClient, Dispatcher, QBittorrentClient, SabnzbdClient},
    load_config,
    notify::{create_notifier, LogNotifier, Notifier},
    postprocess::{FileMetadataExtractor, Reconciler},
    provider::{MediaKind, NewznabProvider, ProviderAdapter, ProviderPipeline},
    validate_config, LibraryStore, Scheduler, SqliteLibraryStore,
};
use bookbag_server::{api::create_router, state::AppState};

/// Buffer size for the notification channel
const NOTIFY_BUFFER_SIZE: usize = 256;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let config_path = std::env::var("BOOKBAG_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Library root: {:?}", config.library.root);

    let store: Arc<dyn LibraryStore> = Arc::new(
        SqliteLibraryStore::new(&config.database.path)
            .context("Failed to open library store")?,
    );
    info!("Library store initialized");

    // Notifications
    let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
    let (notifier, notify_worker) = create_notifier(notifiers, NOTIFY_BUFFER_SIZE);
    let notify_handle = tokio::spawn(notify_worker.run());

    // Providers
    let mut providers: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
    for provider_config in config.providers.iter().filter(|p| p.enabled) {
        let provider = NewznabProvider::new(provider_config.clone())
            .with_context(|| format!("Failed to create provider '{}'", provider_config.name))?;
        info!(
            provider = %provider_config.name,
            media_kind = ?provider_config.media_kind,
            "Provider configured"
        );
        providers.push(Arc::new(provider));
    }
    if providers.is_empty() {
        warn!("No providers enabled, searches will find nothing");
    }
    let pipeline = ProviderPipeline::new(providers, config.scheduler.pipeline());

    // Download clients
    let mut dispatcher = Dispatcher::new(
        Arc::clone(&store),
        notifier.clone(),
        config.snatch.max_snatch_attempts,
    );
    if let Some(qbit_config) = &config.download_clients.qbittorrent {
        info!("Initializing qBittorrent client at {}", qbit_config.url);
        let client: Arc<dyn DownloadClient> = Arc::new(
            QBittorrentClient::new(qbit_config.clone())
                .context("Failed to create qBittorrent client")?,
        );
        dispatcher = dispatcher.with_client(MediaKind::Torrent, client);
    }
    if let Some(sab_config) = &config.download_clients.sabnzbd {
        info!("Initializing SABnzbd client at {}", sab_config.url);
        let client: Arc<dyn DownloadClient> = Arc::new(
            SabnzbdClient::new(sab_config.clone()).context("Failed to create SABnzbd client")?,
        );
        dispatcher = dispatcher.with_client(MediaKind::Nzb, client);
    }

    // Post-processing
    let reconciler = Reconciler::new(
        Arc::clone(&store),
        Arc::new(FileMetadataExtractor::new()),
        config.library.clone(),
        notifier.clone(),
    )
    .with_matcher(config.matching.clone())
    .with_config(config.scheduler.reconciler())
    .with_placer(config.placer.clone());

    let scheduler = Arc::new(Scheduler::new(
        config.scheduler.clone(),
        Arc::clone(&store),
        pipeline,
        dispatcher,
        reconciler,
        config.snatch.clone(),
        config.matching.clone(),
    ));

    if config.scheduler.enabled {
        scheduler.start();
        info!("Scheduler started");
    } else {
        info!("Scheduler disabled, items are only searched on demand");
    }

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let state = Arc::new(AppState::new(
        config,
        Arc::clone(&store),
        Arc::clone(&scheduler),
    ));
    let app = create_router(state);

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down");
    scheduler.stop();

    // The worker exits once every handle is dropped; don't wait forever on it.
    drop(notifier);
    drop(scheduler);
    if tokio::time::timeout(std::time::Duration::from_secs(5), notify_handle)
        .await
        .is_err()
    {
        warn!("Notifier worker did not drain in time");
    }

    info!("Server stopped");
    Ok(())
}

/// Initialize tracing. `BOOKBAG_LOG_JSON=1` switches to JSON lines.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());

    let json = std::env::var("BOOKBAG_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
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
            Ok(mut sig) => {
                sig.recv().await;
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
}
