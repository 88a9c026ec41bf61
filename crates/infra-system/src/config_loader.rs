//! Configuration loader
//!
//! # Load Order
//!
//! 1. TOML file (path may start with `~`)
//! 2. Environment variables `CMDPORT__<SECTION>__<KEY>` (e.g.
//!    `CMDPORT__RUNNER__ENV_MODE=merge`)
//!
//! Each layer overrides the previous.
//!
//! # Example
//!
//! ```toml
//! [runner]
//! env_mode = "replace"
//! inherit_env = ["PATH", "HOME"]
//!
//! [[channels]]
//! name = "relay"
//! read_command = "gpio read 4"
//! write_command = "gpio write 4 $relay"
//! output_regexp = "(\\d)"
//! timeout = 2
//!
//! [[channels.ports]]
//! id = "relay"
//! type = "boolean"
//! ```

use cmdport_core::domain::{ChannelConfig, RunnerConfig};
use cmdport_core::AppError;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CMDPORT";

/// Whole application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl AppConfig {
    /// Validate every channel and require unique channel names
    pub fn validate(&self) -> Result<(), AppError> {
        if self.channels.is_empty() {
            return Err(AppError::Config("no channels configured".to_string()));
        }

        let mut names = HashSet::new();
        for channel in &self.channels {
            if !names.insert(channel.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate channel name '{}'",
                    channel.name
                )));
            }
            channel.validate()?;
        }

        Ok(())
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.name == name)
    }
}

/// Load and validate configuration from a TOML file plus env overrides
pub fn load_config(path: &str) -> Result<AppConfig, AppError> {
    let path = shellexpand::tilde(path).into_owned();
    debug!(path = %path, "Loading configuration");

    let builder = Config::builder().add_source(File::new(&path, FileFormat::Toml));
    build(builder)
}

/// Load configuration from TOML text (env overrides still apply)
pub fn load_config_str(toml: &str) -> Result<AppConfig, AppError> {
    let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
    build(builder)
}

fn build(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<AppConfig, AppError> {
    let settings = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| AppError::Config(e.to_string()))?;

    let config: AppConfig = settings
        .try_deserialize()
        .map_err(|e| AppError::Config(e.to_string()))?;

    config.validate()?;
    Ok(config)
}
