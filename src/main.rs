use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::{GatewayConfig, StoreKind};
use tollgate::error::TollgateError;
use tollgate::http::{accept_request, admin_router, gated, GateState, HttpServer};
use tollgate::ratelimit::{Classifier, RateLimiter};
use tollgate::store::{CounterStore, MemoryStore, RedisStore};

/// HTTP request-rate governor.
#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// YAML configuration file; environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address of the rate limited listener
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Address of the admin listener
    #[arg(long)]
    admin_addr: Option<SocketAddr>,

    /// Counter store backend
    #[arg(long, value_enum)]
    store: Option<StoreKind>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A .env file in the working directory seeds the environment, including RUST_LOG.
    let dotenv = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(args.json_logs);

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match dotenv {
        Ok(path) => info!(path = %path.display(), "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Failed to load .env file"),
    }

    let mut config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.listen_addr {
        config.listen_addr = addr;
    }
    if let Some(addr) = args.admin_addr {
        config.admin_addr = Some(addr);
    }
    if let Some(store) = args.store {
        config.store = store;
    }
    config.validate()?;

    let limits = config.limit_settings();
    info!(
        ip_quota = limits.ip_quota,
        token_quota = limits.token_quota,
        block_secs = limits.block_duration.as_secs(),
        store = ?config.store,
        "Configuration loaded"
    );

    // Initialize the counter store
    let mut sweeper = None;
    let store: Arc<dyn CounterStore> = match config.store {
        StoreKind::Memory => {
            let store = Arc::new(MemoryStore::new());
            sweeper = Some(store.spawn_sweeper(config.sweep_interval()));
            store
        }
        StoreKind::Redis => {
            let url = config.redis_url().ok_or_else(|| {
                TollgateError::Config("REDIS_HOST is required for the redis store".to_string())
            })?;
            Arc::new(RedisStore::connect(&url).await?)
        }
    };

    let limiter = Arc::new(RateLimiter::new(store, &limits));
    let state = Arc::new(GateState::new(Classifier::new(&limits), limiter));
    info!("Rate limiter initialized");

    let gateway = HttpServer::bind(
        "gateway",
        config.listen_addr,
        gated(Router::new().fallback(accept_request), state.clone()),
    )
    .await?;
    let admin = match config.admin_addr {
        Some(addr) => Some(HttpServer::bind("admin", addr, admin_router(state.clone())).await?),
        None => None,
    };

    // Run the servers with graceful shutdown on Ctrl+C
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut servers = JoinSet::new();
    servers.spawn(gateway.serve_with_shutdown(wait_for_shutdown(shutdown_rx.clone())));
    if let Some(admin) = admin {
        servers.spawn(admin.serve_with_shutdown(wait_for_shutdown(shutdown_rx.clone())));
    }

    tokio::select! {
        _ = shutdown_signal() => {}
        Some(result) = servers.join_next() => {
            error!("HTTP server exited before shutdown was requested");
            result??;
        }
    }

    let _ = shutdown_tx.send(true);
    while let Some(result) = servers.join_next().await {
        result??;
    }
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    info!("Tollgate stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.changed().await;
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
