use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use takrelay_core::{DeliveryMode, LogFormat, LoggingConfig, RelayConfig};
use takrelay_router::{
    DeliveryStrategy, EntityRegistry, HandlerRegistry, MessageRouter, PresenceReaper,
    ReaperConfig, RelayMetrics, RouterConfig,
};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod http;
mod server_listener;
mod udp_listener;

use server_listener::{ListenerConfig, TcpListener};
use udp_listener::UdpListener;

/// TAKRelay - relay server for TAK clients
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/takrelay.yaml", env = "TAKRELAY_CONFIG")]
    config: PathBuf,

    /// Write every accepted event to per-type log files
    #[arg(short, long)]
    logging: bool,
}

fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "takrelay={0},takrelay_router={0},takrelay_cot={0},tower_http=warn",
            config.level
        ))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn router_config(config: &RelayConfig, event_logging: bool) -> RouterConfig {
    let delivery = match config.router.delivery {
        DeliveryMode::DropOnFull => DeliveryStrategy::DropOnFull,
        DeliveryMode::TryForTimeout => {
            DeliveryStrategy::TryForTimeout(config.router.delivery_timeout())
        }
    };

    RouterConfig {
        inbound_capacity: config.router.inbound_capacity,
        delivery,
        event_log_dir: (event_logging || config.router.logging)
            .then(|| config.router.log_dir.clone()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = RelayConfig::load(&args.config)
        .with_context(|| format!("Failed to load config file: {:?}", args.config))?;
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging);

    info!("Starting TAKRelay");
    info!(config = ?args.config, "Configuration loaded");

    let entities = Arc::new(EntityRegistry::new());
    let handlers = Arc::new(HandlerRegistry::new());
    let metrics = Arc::new(RelayMetrics::new());
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let router = MessageRouter::new(
        Arc::clone(&entities),
        Arc::clone(&handlers),
        Arc::clone(&metrics),
        router_config(&config, args.logging),
    );
    let inbound = router.sender();

    let reaper = PresenceReaper::new(
        Arc::clone(&entities),
        Arc::clone(&metrics),
        ReaperConfig {
            interval: config.presence.reap_interval(),
            offline_timeout: config.presence.offline_timeout(),
        },
    );

    let tcp = TcpListener::new(
        ListenerConfig {
            bind_addr: config.server.tcp_addr(),
            max_frame_size: config.server.max_frame_size,
            outbound_capacity: config.router.outbound_capacity,
        },
        Arc::clone(&handlers),
        inbound.clone(),
    );
    let tcp_state = tcp.state();
    let udp = UdpListener::new(config.server.udp_addr(), inbound);

    let api_state = http::ApiState {
        home: config.home,
        entities: Arc::clone(&entities),
        handlers: Arc::clone(&handlers),
        metrics: Arc::clone(&metrics),
        listener: tcp_state,
    };

    let tasks = vec![
        router.start(shutdown_tx.subscribe()),
        reaper.start(shutdown_tx.subscribe()),
        tcp.start(shutdown_tx.subscribe()).await?,
        udp.start(shutdown_tx.subscribe()).await?,
        http::serve(&config.server.web_addr(), api_state, shutdown_tx.subscribe()).await?,
    ];

    info!(
        tcp = %config.server.tcp_addr(),
        udp = %config.server.udp_addr(),
        web = %config.server.web_addr(),
        "TAKRelay running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    if shutdown_tx.send(()).is_err() {
        warn!("No tasks listening for shutdown");
    }
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Task ended abnormally");
        }
    }

    info!("TAKRelay stopped");
    Ok(())
}
