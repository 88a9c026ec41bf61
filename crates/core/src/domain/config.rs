// Channel and runner configuration (deserialized by the infra config loader)

use super::descriptor::ValueDescriptor;
use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Command timeout (5 seconds)
pub const DEFAULT_TIMEOUT_SECS: f64 = 5.0;

/// Interval between regular polls (10 seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 10.0;

/// Interval before the next poll after a failed one (5 seconds)
pub const DEFAULT_RETRY_POLL_INTERVAL_SECS: f64 = 5.0;

/// Channel name used when none is configured
pub const DEFAULT_CHANNEL_NAME: &str = "cmdline";

/// Host variables a write command keeps in `replace` mode
pub const DEFAULT_INHERITED_ENV: &[&str] = &["PATH", "HOME", "USER"];

/// One command-line channel: a read command, an optional write command and
/// the ports multiplexed through them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_name")]
    pub name: String,

    pub read_command: String,

    #[serde(default)]
    pub write_command: Option<String>,

    /// Pattern applied to the read command's output; exit-code mode when absent
    #[serde(default)]
    pub output_regexp: Option<String>,

    #[serde(default)]
    pub ports: Vec<ValueDescriptor>,

    /// Shorthand for a single-port channel
    #[serde(default)]
    pub port: Option<ValueDescriptor>,

    #[serde(rename = "timeout", default = "default_timeout")]
    pub timeout_secs: f64,

    #[serde(rename = "poll_interval", default = "default_poll_interval")]
    pub poll_interval_secs: f64,

    #[serde(rename = "retry_poll_interval", default = "default_retry_poll_interval")]
    pub retry_poll_interval_secs: f64,
}

fn default_name() -> String {
    DEFAULT_CHANNEL_NAME.to_string()
}

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_poll_interval() -> f64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_retry_poll_interval() -> f64 {
    DEFAULT_RETRY_POLL_INTERVAL_SECS
}

impl ChannelConfig {
    /// Minimal configuration; everything else takes its default
    pub fn new(read_command: impl Into<String>, ports: Vec<ValueDescriptor>) -> Self {
        Self {
            name: default_name(),
            read_command: read_command.into(),
            write_command: None,
            output_regexp: None,
            ports,
            port: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            retry_poll_interval_secs: DEFAULT_RETRY_POLL_INTERVAL_SECS,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_write_command(mut self, command: impl Into<String>) -> Self {
        self.write_command = Some(command.into());
        self
    }

    pub fn with_output_regexp(mut self, pattern: impl Into<String>) -> Self {
        self.output_regexp = Some(pattern.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs_f64();
        self
    }

    /// Ordered descriptors: `ports` when given, otherwise the single `port`
    pub fn descriptors(&self) -> Vec<ValueDescriptor> {
        if self.ports.is_empty() {
            self.port.iter().cloned().collect()
        } else {
            self.ports.clone()
        }
    }

    /// Command timeout; an out-of-range value (rejected by `validate`)
    /// falls back to the default instead of zero
    pub fn timeout(&self) -> Duration {
        secs_to_duration(self.timeout_secs, DEFAULT_TIMEOUT_SECS)
    }

    pub fn poll_interval(&self) -> Duration {
        secs_to_duration(self.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS)
    }

    pub fn retry_poll_interval(&self) -> Duration {
        secs_to_duration(self.retry_poll_interval_secs, DEFAULT_RETRY_POLL_INTERVAL_SECS)
    }

    /// Check the invariants a channel relies on
    pub fn validate(&self) -> Result<()> {
        if self.read_command.trim().is_empty() {
            return Err(invalid(format!("channel '{}': read_command is empty", self.name)));
        }

        let descriptors = self.descriptors();
        if descriptors.is_empty() {
            return Err(invalid(format!("channel '{}': no ports configured", self.name)));
        }

        let mut seen = HashSet::new();
        for d in &descriptors {
            if d.id.is_empty() {
                return Err(invalid(format!("channel '{}': empty port id", self.name)));
            }
            if !seen.insert(d.id.as_str()) {
                return Err(invalid(format!(
                    "channel '{}': duplicate port id '{}'",
                    self.name, d.id
                )));
            }
        }

        for (field, secs) in [
            ("timeout", self.timeout_secs),
            ("poll_interval", self.poll_interval_secs),
            ("retry_poll_interval", self.retry_poll_interval_secs),
        ] {
            if positive_duration(secs).is_none() {
                return Err(invalid(format!(
                    "channel '{}': {} must be a positive, representable number of seconds",
                    self.name, field
                )));
            }
        }

        Ok(())
    }
}

fn invalid(msg: String) -> DomainError {
    DomainError::InvalidConfig(msg)
}

/// Non-zero duration for `secs`, if it is representable
fn positive_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok().filter(|d| !d.is_zero())
}

fn secs_to_duration(secs: f64, default_secs: f64) -> Duration {
    positive_duration(secs).unwrap_or_else(|| Duration::from_secs_f64(default_secs))
}

/// How a command's environment is built when an overlay is given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvMode {
    /// Full host environment plus the overlay
    Merge,
    /// Only allowlisted host variables plus the overlay
    #[default]
    Replace,
}

/// Shell runner settings shared by every channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub env_mode: EnvMode,

    #[serde(default = "default_inherit_env")]
    pub inherit_env: Vec<String>,
}

fn default_inherit_env() -> Vec<String> {
    DEFAULT_INHERITED_ENV.iter().map(|s| s.to_string()).collect()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            env_mode: EnvMode::default(),
            inherit_env: default_inherit_env(),
        }
    }
}
