use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use rust_restream::RestreamEngine;
use rust_restream::api::ApiServer;
use rust_restream::api::server::{ApiServerConfig, AppState};
use rust_restream::config::ConfigStore;
use rust_restream::encoder::FfmpegLauncher;
use rust_restream::logging::init_logging;

/// Restream one live channel to many RTMP destinations.
#[derive(Debug, Parser)]
#[command(name = "rust-restream", version, about)]
struct Args {
    /// Configuration file, created with defaults when missing.
    #[arg(short, long, env = "RESTREAM_CONFIG", default_value = "restream.toml")]
    config: PathBuf,

    /// Directory for the daily rolling log files.
    #[arg(long, env = "RESTREAM_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// API bind address (overrides API_BIND_ADDRESS).
    #[arg(long)]
    bind: Option<String>,

    /// API port (overrides API_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Do not start publishing on launch.
    #[arg(long)]
    no_autostart: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let (logging, _guard) = init_logging(&args.log_dir).context("failed to initialize logging")?;

    let store = Arc::new(
        ConfigStore::load_or_init(&args.config)
            .await
            .with_context(|| format!("failed to load {}", args.config.display()))?,
    );
    logging.apply_persisted_filter(&store);

    let config = store.snapshot();
    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(config.logging.retention_days, shutdown.child_token());

    match FfmpegLauncher::detect_version(&config.encoder.binary_path) {
        Some(version) => info!("Using {}", version),
        None => warn!(
            path = %config.encoder.binary_path,
            "ffmpeg not found, publishing will fail until it is installed"
        ),
    }

    let engine = Arc::new(RestreamEngine::new(Arc::new(FfmpegLauncher::new())));
    engine.update_config(config.clone()).await?;

    if args.no_autostart {
        info!("Autostart disabled");
    } else if config.destinations.iter().any(|d| d.enabled) {
        if let Err(e) = engine.start(config).await {
            error!("Failed to start engine: {}", e);
        }
    } else {
        info!("No enabled destinations, waiting for configuration");
    }

    let mut server_config = ApiServerConfig::from_env_or_default();
    if let Some(bind) = args.bind {
        server_config.bind_address = bind;
    }
    if let Some(port) = args.port {
        server_config.port = port;
    }

    let state = AppState::new(engine.clone(), store).with_logging_config(logging.clone());
    let server = ApiServer::with_state(server_config, state);
    let server_token = server.cancel_token();
    let server_task = tokio::spawn(async move { server.run().await });

    wait_for_shutdown_signal().await?;
    info!("Shutdown signal received");

    server_token.cancel();
    shutdown.cancel();

    if engine.is_running().await {
        engine.stop().await?;
    }

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("API server error: {}", e),
        Err(e) => error!("API server task failed: {}", e),
    }

    info!("rust-restream stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
