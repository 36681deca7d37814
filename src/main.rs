use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use camera_stream_manager::{
    api::{self, AppState},
    capture::CaptureService,
    config::ConfigManager,
    database::{CameraStore, SqliteCameraStore},
    manager::SessionManager,
    reaper::{IdleReaper, ReaperConfig},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/camera-stream-manager/config.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Bind address for the REST API, overrides the configuration
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting Camera Stream Manager v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {:?}", args.config);

    // Load configuration
    let mut config_manager = ConfigManager::new(args.config.clone()).await?;
    let mut config = config_manager.get().await;

    if let Some(bind) = &args.bind {
        let (host, port) = bind
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("--bind must be HOST:PORT"))?;
        config.api.host = host.to_string();
        config.api.port = port.parse()?;
    }
    let config = Arc::new(config);
    info!("App name: {}", config.app.name);

    tokio::fs::create_dir_all(&config.streaming.output_root).await?;

    // Start configuration file watching only if the config file exists
    if args.config.exists() {
        config_manager.start_watching().await?;
        info!("Configuration hot-reload enabled");
    }

    // Optional read-only camera store
    let store: Option<Arc<dyn CameraStore>> = match &config.database {
        Some(db_config) => match SqliteCameraStore::connect(db_config).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!("Camera store unavailable, continuing without it: {}", e);
                None
            }
        },
        None => None,
    };

    // Initialize components
    let manager = Arc::new(SessionManager::new(config.clone()));
    info!("Session manager initialized");

    let capture = Arc::new(CaptureService::new(
        &config.streaming,
        config.capture.clone(),
    ));

    let mut reaper = IdleReaper::new(ReaperConfig::from(&config.streaming), manager.clone());
    reaper.start();

    // Start API server (actix-web runs its own system)
    let api_config = config.clone();
    let api_state = AppState {
        manager: manager.clone(),
        capture,
        store,
    };
    std::thread::spawn(move || {
        let runtime = actix_rt::System::new();
        runtime.block_on(async move {
            if let Err(e) = api::start_server(api_config, api_state).await {
                error!("API server error: {}", e);
            }
        });
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");

    reaper.stop();

    // No transcoder may outlive the host process.
    let shutdown_timeout = Duration::from_secs(config.app.shutdown_timeout_seconds);
    if tokio::time::timeout(shutdown_timeout, manager.stop_all())
        .await
        .is_err()
    {
        error!("Shutdown timed out with sessions still terminating");
    }

    info!("Shutdown complete");
    Ok(())
}
