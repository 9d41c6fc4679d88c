//! Combo Link - host side
//!
//! Bridges a rotary-encoder combo panel on a serial port to per-device audio
//! volumes.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use combo_link::config::{AppConfig, ConfigWatcher};
use combo_link::host::{self, HostContext};
use combo_link::monitor;
use combo_link::paths::AppPaths;
use combo_link::transport::{SerialConnector, Transport};
use combo_link::volume::ConsoleVolume;

/// Combo Link - drive audio volumes from a rotary-encoder panel
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to the detected app path)
    #[arg(short, long, env = "COMBO_LINK_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port to use, overriding the configured device filter
    #[arg(short, long, env = "COMBO_LINK_PORT")]
    port: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available serial ports
    #[arg(long)]
    list_ports: bool,

    /// Print device events without changing volumes
    #[arg(long)]
    monitor: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let paths = AppPaths::detect();
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => {
            paths.ensure_directories()?;
            paths.config.clone()
        }
    };

    // One read of the file; the watcher hands back what it loaded
    let (config_watcher, mut config) = if args.list_ports || args.monitor {
        (None, AppConfig::load(&config_path.to_string_lossy()).await?)
    } else {
        let (watcher, initial) = ConfigWatcher::new(&config_path).await?;
        (Some(watcher), (*initial).clone())
    };
    if let Some(port) = &args.port {
        config.serial.port = Some(port.clone());
    }

    let log_file = config.log_file.as_deref().map(|f| paths.log_path(f));
    let _log_guard = init_logging(&args.log_level, log_file.as_deref())?;

    info!("Starting Combo Link v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", config_path.display());

    if args.list_ports {
        monitor::list_ports_formatted(&config.serial.device_filter())?;
        return Ok(());
    }

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let connector = Arc::new(SerialConnector::new(config.serial.baud_rate));

    if args.monitor {
        return monitor::run_monitor(
            connector,
            config.serial.device_filter(),
            config.transport.to_transport_config(),
            cancel,
        )
        .await;
    }

    let config_watcher = config_watcher.context("Config watcher not started")?;
    run_app(connector, config, config_watcher, args.port, cancel).await?;

    info!("Combo Link shutdown complete");
    Ok(())
}

async fn run_app(
    connector: Arc<SerialConnector>,
    config: AppConfig,
    mut config_watcher: ConfigWatcher,
    port_override: Option<String>,
    cancel: CancellationToken,
) -> Result<()> {
    info!(
        "Hot-reload enabled for {} ({} combo mapping(s))",
        config_watcher.path().display(),
        config.combos.len()
    );

    let mut transport = Transport::spawn(
        connector,
        config.serial.device_filter().into_matcher(),
        config.transport.to_transport_config(),
        cancel.child_token(),
    );
    let events = transport
        .receive_channel()
        .context("Receive channel already taken")?;

    let ctx = HostContext::new(config, Arc::new(ConsoleVolume::default()));
    let processor = tokio::spawn(host::run_event_processor(ctx.clone(), events, cancel.clone()));
    let sync = tokio::spawn(host::run_volume_sync(
        ctx.clone(),
        transport.send_channel(),
        cancel.clone(),
    ));

    info!("Ready, waiting for the panel");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            new_config = config_watcher.next_config() => match new_config {
                Some(mut new_config) => {
                    info!("📝 Configuration file changed, applying combo mapping");
                    if let Some(port) = &port_override {
                        new_config.serial.port = Some(port.clone());
                    }
                    if new_config.serial.device_filter() != ctx.config().await.serial.device_filter() {
                        warn!("Serial settings changed, restart to apply them");
                    }
                    ctx.update_config(new_config).await;
                }
                None => {
                    warn!("Config watcher stopped, hot-reload disabled");
                    cancel.cancelled().await;
                    break;
                }
            },
        }
    }

    info!("Shutting down...");
    transport.close().await;
    for task in [processor, sync] {
        if let Err(e) = task.await {
            warn!("Host task ended abnormally: {}", e);
        }
    }

    let stats = transport.stats();
    info!(
        "Link stats: {} sent, {} received, {} invalid, {} dropped in, {} dropped out, {} connection(s)",
        stats.frames_sent(),
        stats.frames_received(),
        stats.invalid_frames(),
        stats.inbound_dropped(),
        stats.outbound_dropped(),
        stats.connections()
    );

    Ok(())
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let name = path
                .file_name()
                .context("Log file path has no file name")?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        return;
    }
    info!("Shutdown signal received");
    cancel.cancel();
}
