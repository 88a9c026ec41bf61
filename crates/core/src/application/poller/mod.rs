// Poller - periodic read cycles for one channel

mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::channel::CommandLineChannel;
use crate::domain::{ChannelConfig, PortValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Drives `poll()` on a channel until shutdown
///
/// Polls immediately, then every `poll_interval`; after a failed poll the
/// next attempt comes after `retry_interval` instead.
pub struct ChannelPoller {
    channel: Arc<CommandLineChannel>,
    poll_interval: Duration,
    retry_interval: Duration,
}

impl ChannelPoller {
    pub fn new(
        channel: Arc<CommandLineChannel>,
        poll_interval: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            channel,
            poll_interval,
            retry_interval,
        }
    }

    /// Poller using the intervals of the channel's configuration
    pub fn from_config(channel: Arc<CommandLineChannel>, config: &ChannelConfig) -> Self {
        Self::new(channel, config.poll_interval(), config.retry_poll_interval())
    }

    /// Run poll loop (background task)
    ///
    /// Should be spawned in tokio::spawn
    pub async fn run(self, mut shutdown: ShutdownToken) {
        let name = self.channel.name().to_string();
        info!(
            channel = %name,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            retry_interval_ms = self.retry_interval.as_millis() as u64,
            "Poller started"
        );

        let mut last = self.channel.values().await;

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let delay = match self.channel.poll().await {
                Ok(()) => {
                    let current = self.channel.values().await;
                    log_changes(&name, &last, &current);
                    last = current;
                    self.poll_interval
                }
                Err(e) => {
                    warn!(
                        channel = %name,
                        error = %e,
                        retry_in_ms = self.retry_interval.as_millis() as u64,
                        "Poll failed"
                    );
                    self.retry_interval
                }
            };

            tokio::select! {
                _ = sleep(delay) => {},
                _ = shutdown.wait() => {
                    info!(channel = %name, "Poller interrupted during sleep");
                    break;
                }
            }
        }

        info!(channel = %name, "Poller stopped");
    }
}

fn log_changes(
    channel: &str,
    before: &[(String, Option<PortValue>)],
    after: &[(String, Option<PortValue>)],
) {
    for ((id, old), (_, new)) in before.iter().zip(after) {
        if old != new {
            info!(
                channel = %channel,
                port = %id,
                old = %display_value(old),
                new = %display_value(new),
                "Value changed"
            );
        }
    }
}

fn display_value(value: &Option<PortValue>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "unknown".to_string())
}
