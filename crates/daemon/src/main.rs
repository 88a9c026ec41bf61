//! cmdport daemon - Main Entry Point
//! Polls every configured command-line channel until Ctrl+C

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cmdport_core::application::{make_ports, shutdown_channel, ChannelPoller, CommandLineChannel};
use cmdport_core::port::time_provider::SystemTimeProvider;
use cmdport_infra_system::{load_config, ShellCommandRunner};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_CONFIG_PATH: &str = "~/.cmdport/config.toml";

/// Time given to pollers to finish their current cycle on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    let log_format = std::env::var("CMDPORT_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("cmdport=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("cmdport daemon v{} starting...", VERSION);

    // 2. Load configuration
    let config_path = std::env::var("CMDPORT_CONFIG")
        .unwrap_or_else(|_| shellexpand::tilde(DEFAULT_CONFIG_PATH).into_owned());

    info!(config_path = %config_path, "Loading configuration...");
    let config = load_config(&config_path).context("Failed to load configuration")?;

    // 3. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let runner = Arc::new(ShellCommandRunner::new(time_provider, &config.runner));

    // 4. Build channels and start one poller each
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut handles = Vec::new();

    for channel_config in &config.channels {
        let channel = Arc::new(
            CommandLineChannel::new(channel_config, runner.clone())
                .with_context(|| format!("Invalid channel '{}'", channel_config.name))?,
        );

        for port in make_ports(&channel) {
            info!(
                channel = %channel.name(),
                port = %port.id(),
                port_type = %port.port_type(),
                writable = port.is_writable(),
                "Port registered"
            );
        }

        let poller = ChannelPoller::from_config(channel, channel_config);
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            poller.run(shutdown).await;
        }));
    }

    info!(channels = handles.len(), "System ready. Polling channels...");
    info!("Press Ctrl+C to shutdown");

    // 5. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 6. Graceful shutdown
    shutdown_tx.shutdown();
    for handle in handles {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Err(e)) if e.is_panic() => tracing::error!(error = ?e, "Poller panicked"),
            Ok(_) => {}
            Err(_) => tracing::warn!("Poller did not stop in time"),
        }
    }

    info!("Shutdown complete.");

    Ok(())
}
