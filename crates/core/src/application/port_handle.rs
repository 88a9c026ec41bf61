// Port handles - one addressable port backed by a shared channel

use crate::application::channel::CommandLineChannel;
use crate::domain::{DomainError, PortSpec, PortType, PortValue};
use crate::error::Result;
use std::sync::Arc;

/// A single port of a `CommandLineChannel`
#[derive(Clone)]
pub struct ChannelPort {
    channel: Arc<CommandLineChannel>,
    spec: PortSpec,
}

impl ChannelPort {
    pub fn new(channel: Arc<CommandLineChannel>, spec: PortSpec) -> Self {
        Self { channel, spec }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn port_type(&self) -> PortType {
        self.spec.port_type
    }

    pub fn is_writable(&self) -> bool {
        self.spec.writable
    }

    /// Last value seen by the channel's most recent poll
    pub async fn read_value(&self) -> Option<PortValue> {
        self.channel.read(&self.spec.id).await
    }

    pub async fn write_value(&self, value: impl Into<PortValue>) -> Result<()> {
        if !self.spec.writable {
            return Err(DomainError::ReadOnly(self.spec.id.clone()).into());
        }
        self.channel.write(&self.spec.id, value.into()).await
    }
}

impl std::fmt::Debug for ChannelPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPort")
            .field("channel", &self.channel.name())
            .field("spec", &self.spec)
            .finish()
    }
}

/// Build one port handle per descriptor of the channel
pub fn make_ports(channel: &Arc<CommandLineChannel>) -> Vec<ChannelPort> {
    channel
        .make_port_specs()
        .into_iter()
        .map(|spec| ChannelPort::new(Arc::clone(channel), spec))
        .collect()
}
