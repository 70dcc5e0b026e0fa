use anyhow::{Context, Result};
use clap::Parser;
use mediacast_core::{DeviceStreamer, EventBus, ServerConfig};
use mediacast_streaming::{
    AirplayControlPoint, AirplayStreamer, SoapControlPoint, StreamingManager, UpnpStreamer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Headless streaming controller for UPnP renderers and AirPlay receivers
#[derive(Parser, Debug)]
#[command(name = "mediacast")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seconds between status polls, 0 disables polling (overrides config file)
    #[arg(long, value_name = "SECONDS")]
    status_delay: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mediacast=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting mediacast v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => {
            tracing::info!("No configuration file given, using defaults");
            ServerConfig::default()
        }
    };
    if let Some(delay) = args.status_delay {
        config.streaming.status_update_delay_seconds = delay;
    }

    let events = EventBus::new(config.streaming.event_capacity);

    let airplay = Arc::new(AirplayControlPoint::new(&config.airplay));
    let soap = Arc::new(
        SoapControlPoint::new(config.upnp.action_timeout())
            .context("Failed to build the UPnP control point")?,
    );
    let streamers: Vec<Arc<dyn DeviceStreamer>> = vec![
        Arc::new(UpnpStreamer::new(soap, events.clone())),
        Arc::new(AirplayStreamer::new(airplay, events.clone())),
    ];

    let manager = StreamingManager::new(&config.streaming, events, streamers);

    for device in config.devices {
        let device = device
            .into_device()
            .context("Invalid device in configuration")?;
        manager.add_device(device);
    }
    tracing::info!("{} devices registered", manager.devices().len());

    let mut receiver = manager.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => match event.error_message() {
                    Some(message) => {
                        tracing::warn!("{} on {} failed: {}", event.kind, event.device_id, message)
                    }
                    None => tracing::info!("{} on {}", event.kind, event.device_id),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event log lagged, {} events skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down");
    event_log.abort();
    manager.shutdown();

    Ok(())
}
