//! asset-relay - route pushed asset imports to the active application instance

use anyhow::{Context, Result};
use asset_relay_core::config::{Config, ConfigOverrides, resolve_config};
use asset_relay_core::io::CoordinationStore;
use asset_relay_core::liveness::OsProcessProbe;
use asset_relay_core::payload::SHUTDOWN_SENTINEL;
use asset_relay_core::queue::SceneImporter;
use asset_relay_core::{ImportRequest, home, logging};
use asset_relay_daemon::daemon::{Coordinator, LogOnlyWindow, ProcessContext, default_display_name};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Route pushed asset imports to the active application instance
#[derive(Parser, Debug)]
#[command(name = "asset-relay")]
#[command(about = "Route pushed asset imports to the active application instance")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Ingest port override
    #[arg(long, value_name = "PORT", global = true)]
    port: Option<u16>,

    /// Coordination record path override
    #[arg(long, value_name = "PATH", global = true)]
    record: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join coordination as hub or client and process imports until stopped
    Run {
        /// Instance display name (default: "Unsaved (pid N)")
        #[arg(long)]
        name: Option<String>,

        /// Claim active status after startup
        #[arg(long)]
        claim: bool,
    },

    /// Print the current coordination record
    Status,

    /// Push one asset to the ingest port
    Send {
        /// Asset directory or file
        path: PathBuf,

        /// Asset display name
        #[arg(long)]
        name: Option<String>,

        /// Texture resolution hint, e.g. 4K
        #[arg(long)]
        resolution: Option<String>,
    },

    /// Ask the ingest listener to stop
    StopListener,
}

/// Importer for headless runs: logs each request.
struct LoggingImporter;

impl SceneImporter for LoggingImporter {
    fn import(&self, request: &ImportRequest) -> anyhow::Result<()> {
        info!(
            "Import {} from {} (thumbnail: {:?}, resolution: {:?})",
            request.asset_name,
            request.asset_path.display(),
            request.thumbnail_path,
            request.texture_resolution
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        logging::init_with_level(tracing::Level::DEBUG);
    } else {
        logging::init();
    }

    let home_dir = home::get_home_dir().context("Failed to determine home directory")?;
    let overrides = ConfigOverrides {
        config_path: args.config.clone(),
        port: args.port,
        record_path: args.record.clone(),
    };
    let config = resolve_config(&overrides, &home_dir).context("Failed to resolve configuration")?;

    match args.command {
        Command::Run { name, claim } => run(config, name, claim).await,
        Command::Status => status(&config),
        Command::Send { path, name, resolution } => send(&config, path, name, resolution).await,
        Command::StopListener => push(&config, SHUTDOWN_SENTINEL).await,
    }
}

async fn run(config: Config, name: Option<String>, claim: bool) -> Result<()> {
    let display_name = default_display_name(std::process::id(), name.as_deref());
    info!("asset-relay starting as \"{display_name}\"");

    let ctx = ProcessContext::new(
        config,
        display_name,
        Arc::new(OsProcessProbe),
        Arc::new(LoggingImporter),
        Arc::new(LogOnlyWindow),
    );
    let mut coordinator = Coordinator::new(Arc::new(ctx));
    let role = coordinator
        .initialize()
        .await
        .context("Failed to join coordination")?;
    info!("Running as {role:?}");

    if let Some(addr) = coordinator.ingest_addr() {
        info!("Accepting payloads on {addr}");
    }
    if claim {
        if let Err(e) = coordinator.claim_active() {
            warn!("Could not claim active status: {e}");
        }
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());
    cancel.cancelled().await;

    coordinator.shutdown().await;
    info!("asset-relay shutdown complete");
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                    }
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {e}");
                    if let Err(e) = ctrl_c.await {
                        warn!("Failed to listen for Ctrl+C: {e}");
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = ctrl_c.await {
                warn!("Failed to listen for Ctrl+C: {e}");
            }
            info!("Received Ctrl+C");
        }

        cancel.cancel();
    });
}

fn status(config: &Config) -> Result<()> {
    let store = CoordinationStore::new(config.record_path(), Arc::new(OsProcessProbe))
        .with_stale_after(config.coordination.stale_after());

    println!("Record: {}", store.path().display());
    match store.read() {
        Some(record) => {
            let alive = store.is_hub_alive(config.coordination.stale_after());
            println!("Hub: pid {} ({})", record.hub_pid, if alive { "alive" } else { "stale" });
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        None => println!("No coordination record"),
    }
    Ok(())
}

async fn send(config: &Config, path: PathBuf, name: Option<String>, resolution: Option<String>) -> Result<()> {
    let path = std::fs::canonicalize(&path).unwrap_or(path);
    let mut descriptor = serde_json::json!({ "path": path });
    if let Some(name) = name {
        descriptor["name"] = serde_json::Value::String(name);
    }
    if let Some(resolution) = resolution {
        descriptor["resolution"] = serde_json::Value::String(resolution);
    }
    push(config, serde_json::to_vec(&descriptor)?.as_slice()).await
}

async fn push(config: &Config, bytes: &[u8]) -> Result<()> {
    let address = config.ingest.address();
    let mut stream = TcpStream::connect(&address)
        .await
        .with_context(|| format!("No ingest listener at {address}"))?;
    stream.write_all(bytes).await?;
    stream.shutdown().await?;
    info!("Sent {} byte(s) to {address}", bytes.len());
    Ok(())
}
