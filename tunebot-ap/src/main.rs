//! tunebot-ap entry point
//!
//! Loads configuration, opens the database, wires the yt-dlp resolver and
//! the local player transport into the playback coordinator, and serves the
//! HTTP control API until Ctrl+C / SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunebot_ap::api::{self, AppContext};
use tunebot_ap::config::{Config, ConfigOverrides};
use tunebot_ap::playback::{CoordinatorOptions, PlaybackCoordinator};
use tunebot_ap::resolver::YtDlpResolver;
use tunebot_ap::transport::CommandTransport;
use tunebot_common::EventBus;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "tunebot-ap")]
#[command(about = "Audio playback queue and cache service for tunebot")]
#[command(version)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "TUNEBOT_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP server port
    #[arg(short, long, env = "TUNEBOT_PORT")]
    port: Option<u16>,

    /// SQLite database file
    #[arg(short, long, env = "TUNEBOT_DATABASE")]
    database: Option<PathBuf>,

    /// Data folder (database and songs)
    #[arg(long)]
    data_folder: Option<PathBuf>,

    /// Directory for downloaded songs
    #[arg(long, env = "TUNEBOT_SONGS_DIR")]
    songs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = ConfigOverrides {
        data_folder: args.data_folder,
        database_path: args.database,
        songs_dir: args.songs_dir,
        port: args.port,
    };

    let config = Config::load(args.config.as_deref(), overrides)
        .await
        .context("Failed to load configuration")?;

    let level = &config.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("tunebot_ap={level},tunebot_common={level},tower_http={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tunebot-ap v{}", env!("CARGO_PKG_VERSION"));
    info!("Data folder: {}", config.data_folder.display());
    info!("Database: {}", config.database_path.display());
    info!("Songs directory: {}", config.songs_dir.display());

    let db_pool = tunebot_common::db::init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    tokio::fs::create_dir_all(&config.songs_dir)
        .await
        .with_context(|| format!("Failed to create songs directory {}", config.songs_dir.display()))?;

    let resolver = Arc::new(YtDlpResolver::new(&config.resolver, config.songs_dir.clone()));
    let transport = Arc::new(CommandTransport::new(&config.transport));

    let coordinator = PlaybackCoordinator::new(
        db_pool.clone(),
        resolver,
        transport,
        EventBus::default(),
        CoordinatorOptions::from_config(&config),
    );

    let ctx = AppContext {
        coordinator: coordinator.clone(),
    };

    api::run(config.port, ctx, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    coordinator.shutdown().await;
    db_pool.close().await;

    info!("Server shutdown complete");
    Ok(())
}

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
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
