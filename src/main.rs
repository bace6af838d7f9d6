use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use raidcast::config::ConfigStore;
use raidcast::relay::MessageRouter;
use raidcast::state::AppState;
use raidcast::storage::SqliteChatStore;
use raidcast::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// raidcast relay server command line arguments
#[derive(Parser, Debug)]
#[command(name = "raidcast")]
#[command(version, about = "Signaling relay for live guild broadcasts", long_about = None)]
struct CliArgs {
    /// Listen address (overrides database config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides database config)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Data directory path (default: ./data)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting raidcast v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg takes precedence
    let data_dir = args.data_dir.unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let db_path = data_dir.join("raidcast.db");
    let config_store = ConfigStore::new(&db_path).await?;
    let mut config = (*config_store.get()).clone();

    // CLI overrides are not persisted
    if let Some(addr) = args.address {
        config.web.bind_address = addr;
    }
    if let Some(port) = args.http_port {
        config.web.http_port = port;
    }

    let chat_store = SqliteChatStore::new(config_store.pool().clone());
    let relay = Arc::new(MessageRouter::new(
        &config.relay,
        Arc::new(chat_store.clone()),
        Arc::new(chat_store.clone()),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let state = AppState::new(
        config_store,
        relay,
        chat_store,
        shutdown_tx.clone(),
        data_dir,
    );

    let app = web::create_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.web.bind_address, config.web.http_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address: {}", e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
    {
        tracing::error!("HTTP server error: {}", e);
    }

    tracing::info!(
        "Server shutdown complete ({} connections dropped)",
        state.relay.registry().len()
    );
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "raidcast=error,tower_http=error",
        LogLevel::Warn => "raidcast=warn,tower_http=warn",
        LogLevel::Info => "raidcast=info,tower_http=info",
        LogLevel::Verbose => "raidcast=debug,tower_http=info",
        LogLevel::Debug => "raidcast=debug,tower_http=debug",
        LogLevel::Trace => "raidcast=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("RAIDCAST_DATA_DIR") {
        return PathBuf::from(path);
    }
    PathBuf::from("./data")
}
