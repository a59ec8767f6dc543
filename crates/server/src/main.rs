use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conveyor_core::{
    create_publisher_system, load_config, validate_config, BroadcastPublisher, Orchestrator,
    Providers, RetryPolicy, SqliteVectorIndex, StageRegistry, Stores, ToolCatalog,
};
use conveyor_server::{create_router, AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Events buffered per WebSocket subscriber before it starts losing them
const EVENT_FANOUT_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let json = std::env::var("CONVEYOR_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn run() -> Result<()> {
    init_tracing();

    let config_path = std::env::var("CONVEYOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        database = ?config.database.path,
        tools = config.tools.len(),
        pipelines = config.pipelines.len(),
        "Configuration loaded"
    );

    // Stores
    let stores = Stores::sqlite(&config.database.path).context("Failed to open stores")?;
    let vectors = Arc::new(
        SqliteVectorIndex::new(&config.database.path).context("Failed to open vector index")?,
    );
    info!("Stores initialized");

    // Handlers
    let providers = Providers::from_config(&config.providers, vectors);
    let registry = StageRegistry::standard(&providers, &config.pools)
        .context("Failed to build stage registry")?;
    let catalog = ToolCatalog::new(&config.tools, &config.pipelines)
        .context("Failed to build tool catalog")?;

    // Event publishing
    let events = Arc::new(BroadcastPublisher::new(EVENT_FANOUT_CAPACITY));
    let (publisher, dispatcher) =
        create_publisher_system(events.clone(), config.orchestrator.publisher_buffer);
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    let orchestrator = Arc::new(
        Orchestrator::new(
            config.orchestrator.clone(),
            &config.pools,
            RetryPolicy::from(&config.retry),
            stores,
            registry,
            catalog,
            publisher,
        )
        .context("Failed to create orchestrator")?,
    );
    orchestrator
        .seed_organizations(&config.organizations)
        .context("Failed to seed organizations")?;
    orchestrator.start().await;

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&orchestrator),
        events,
    ));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    orchestrator.stop().await;

    // The orchestrator owns the last publisher handles. Dropping it closes
    // the channel so the dispatcher drains and exits.
    drop(orchestrator);
    let _ = dispatcher_handle.await;
    info!("Event dispatcher stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
