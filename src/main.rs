use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use gatehouse::auth::{hash_password, StaticCredentials};
use gatehouse::clock::SystemClock;
use gatehouse::config::{GatehouseConfig, LogFormat, LoggingConfig, StoreBackend, StoreConfig};
use gatehouse::http::{build_app, HttpServer};
use gatehouse::store::{MemoryStore, RedisStore, SharedStore};

/// How often the in-process store drops expired keys.
const PURGE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "gatehouse", version, about = "Rate limiting and session authentication gate")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "GATEHOUSE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print an Argon2id hash for an `auth.users` entry
    HashPassword {
        /// Password to hash
        password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Command::HashPassword { password }) = cli.command {
        println!("{}", hash_password(&password)?);
        return Ok(());
    }

    let mut config =
        GatehouseConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }

    init_tracing(&config.logging)?;

    info!("Starting Gatehouse access gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        rate_limiting = config.rate_limiting.enabled,
        window_ms = config.rate_limiting.window_ms,
        max_requests = config.rate_limiting.max_requests,
        "Configuration loaded"
    );

    let store = connect_store(&config.store).await?;

    let credentials = StaticCredentials::from_entries(&config.auth.users);
    if credentials.is_empty() {
        warn!("No login accounts configured, /users/login will reject every request");
    } else {
        info!(accounts = credentials.len(), "Login accounts loaded");
    }

    let app = build_app(
        &config,
        store,
        Arc::new(SystemClock),
        Arc::new(credentials),
    );

    HttpServer::new(config.server.listen_addr, app)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Gatehouse stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("invalid logging.level")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

async fn connect_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn SharedStore>> {
    match config.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.url, config.command_timeout())
                .await
                .with_context(|| format!("failed to connect to store at {}", config.url))?;
            info!(url = %config.url, "Connected to Redis store");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-process store, limits and sessions are not shared between instances");
            let store = Arc::new(MemoryStore::new());

            let purger = Arc::clone(&store);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(PURGE_INTERVAL);
                loop {
                    ticker.tick().await;
                    let purged = purger.purge_expired();
                    if purged > 0 {
                        debug!(purged, "Purged expired store keys");
                    }
                }
            });

            Ok(store as Arc<dyn SharedStore>)
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
