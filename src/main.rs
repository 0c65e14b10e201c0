//! taghub: polls Modbus device registers into named tags and serves them
//! over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use taghub::config::{LogFormat, TagHubConfig};
use taghub::events::EventCache;
use taghub::gateway::TagGateway;
use taghub::http::HttpServer;
use taghub::poller::PollScheduler;
use taghub::registry::TagRegistry;
use taghub::transport::ModbusRtuSource;

/// Field-bus tag server.
#[derive(Parser, Debug)]
#[command(name = "taghub")]
#[command(about = "Polls Modbus device registers into named tags and serves them over HTTP")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "taghub.json5")]
    config: PathBuf,

    /// HTTP listen address (overrides config)
    #[arg(long)]
    listen: Option<String>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration; validation failures are fatal before any polling
    let mut config = TagHubConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }

    // Initialize logging
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    info!("Starting taghub");
    info!(
        tags = config.tags.len(),
        port = %config.serial.port,
        "Loaded configuration from {:?}",
        args.config
    );

    let listen_addr: SocketAddr = config
        .server
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // Shared state
    let registry = Arc::new(TagRegistry::from_config(&config));
    let events = Arc::new(EventCache::new(config.server.cache_max));

    // Shutdown channel; the sender is shared with the API's stopServer action
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // Poll scheduler owns the transport exclusively
    let source = ModbusRtuSource::new(config.serial.clone());
    let scheduler = PollScheduler::from_config(&config, source, registry.clone(), events.clone());

    let poller_shutdown = shutdown_rx.clone();
    let poller_task = tokio::spawn(async move {
        scheduler.run(poller_shutdown).await;
    });

    // HTTP server
    let gateway = Arc::new(TagGateway::new(registry, events, config));
    let http_server = HttpServer::new(gateway, listen_addr, shutdown_tx.clone());
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for a signal or an API-initiated stop
    let mut stop_watch = shutdown_rx.clone();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).expect("failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = async {
            loop {
                if stop_watch.changed().await.is_err() || *stop_watch.borrow() {
                    break;
                }
            }
        } => {
            info!("Stop requested, shutting down...");
        }
    }

    // Signal shutdown and wait for tasks with a bound
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = poller_task.await;
        let _ = http_task.await;
    })
    .await;

    info!("taghub stopped");
    Ok(())
}
