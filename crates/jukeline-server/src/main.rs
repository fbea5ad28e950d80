//! Jukeline Server - standalone headless server for Jukeline.
//!
//! Loads configuration, bootstraps the coordinator/player/connection
//! services, and runs the HTTP server until a shutdown signal arrives.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use jukeline_core::{bootstrap_services, start_server, AppState};
use tokio::signal;

/// Jukeline Server - headless collaborative music queue server.
#[derive(Parser, Debug)]
#[command(name = "jukeline-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace). Overrides the config file.
    #[arg(short, long, env = "JUKELINE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Bind port. Overrides the config file.
    #[arg(short = 'p', long, env = "JUKELINE_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level
            .parse()
            .with_context(|| format!("invalid log level: {level}"))?;
    }

    env_logger::Builder::new()
        .filter_level(config.log_level.as_filter_str().parse().unwrap_or(log::LevelFilter::Info))
        .format_timestamp_millis()
        .init();

    log::info!("jukeline-server v{}", env!("CARGO_PKG_VERSION"));
    log::info!("configuration: port={}, backends={:?}", config.port, config.backends);

    let services = bootstrap_services(config);
    if !services.config.playlists.is_empty() {
        log::info!("loading {} configured playlist(s)", services.config.playlists.len());
        services.coordinator.load_playlists(&services.config.playlists).await;
    }
    let app_state = AppState::builder().from_services(&services).build();

    let server_handle = tokio::spawn(async move {
        if let Err(err) = start_server(app_state).await {
            log::error!("server error: {err}");
        }
    });

    shutdown_signal().await;
    log::info!("shutdown signal received, cleaning up");

    services.shutdown().await;
    server_handle.abort();

    log::info!("shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
