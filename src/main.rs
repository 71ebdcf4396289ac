//! DashGate - session and identity gateway for the metrics dashboard

use chrono::Utc;
use clap::Parser;
use dashgate::api::AppState;
use dashgate::clock::SystemClock;
use dashgate::config::{Config, StoreConfig};
use dashgate::metrics::Metrics;
use dashgate::oauth::OAuthBroker;
use dashgate::registry::{RegistryOptions, SessionRegistry};
use dashgate::store::{FileStore, MemoryStore, SessionStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// DashGate - session gateway for the metrics dashboard
#[derive(Parser, Debug)]
#[command(name = "dashgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Session file path (overrides config)
    #[arg(short, long, value_name = "FILE")]
    store_path: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration from file if specified, otherwise use default loading
    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };

    // CLI overrides
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }
    if let Some(ref path) = cli.store_path {
        config.store = StoreConfig::File { path: path.into() };
    }

    // Initialize tracing. RUST_LOG wins, then --verbose, then the config.
    let log_level = if cli.verbose {
        "dashgate=trace,tower_http=trace".to_string()
    } else {
        config.log_level.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting DashGate session gateway");
    info!("  Listen address: {}", config.listen_addr);
    match &config.store {
        StoreConfig::File { path } => {
            info!("  Session store: file");
            info!("  Session file: {:?}", path);
        }
        StoreConfig::Memory => {
            info!("  Session store: memory (sessions die with the process)");
        }
    }
    info!("  Session ttl: {} h", config.session_ttl_hours);
    info!("  Sweep interval: {} s", config.sweep_interval_secs);
    info!("  Post-login URL: {}", config.post_login_url);
    if !config.admin.enabled() {
        warn!("  Admin login DISABLED - set DGT_ADMIN_USERNAME and DGT_ADMIN_PASSWORD to enable");
    }
    if !config.oauth.is_configured() {
        warn!("  OAuth sign-in DISABLED - client id, secret, redirect URI and allowed domain are required");
    }

    let metrics = Metrics::new();
    metrics
        .process_start_time_seconds
        .set(Utc::now().timestamp() as f64);
    metrics
        .build_info
        .with_label_values(&[env!("CARGO_PKG_VERSION"), config.store_kind()])
        .set(1.0);

    let store: Box<dyn SessionStore> = match &config.store {
        StoreConfig::File { path } => Box::new(FileStore::new(path.clone())),
        StoreConfig::Memory => Box::new(MemoryStore::new()),
    };

    let mut options = RegistryOptions::new(metrics.clone());
    options.session_ttl = config.session_ttl();
    options.sweep_interval = config.sweep_interval();
    let registry = SessionRegistry::spawn(store, Arc::new(SystemClock), options);

    let broker = if config.oauth.is_configured() {
        Some(OAuthBroker::new(&config.oauth)?)
    } else {
        None
    };

    let state = Arc::new(AppState {
        registry,
        broker,
        admin: config.admin.clone(),
        post_login_url: config.post_login_url.clone(),
        metrics,
    });

    let app = dashgate::api::build_router(state);

    // Start server with graceful shutdown
    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("DashGate listening on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
