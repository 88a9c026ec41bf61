// Domain Layer - Pure value model and channel configuration

pub mod cache;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod state;
pub mod value;

// Re-exports
pub use cache::{sanitize_env_name, ValueCache};
pub use config::{ChannelConfig, EnvMode, RunnerConfig};
pub use descriptor::{PortSpec, PortType, ValueDescriptor};
pub use error::DomainError;
pub use state::ChannelState;
pub use value::{coerce, Coerced, PortValue};
