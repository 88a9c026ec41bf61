// Application Layer - Channel orchestration

pub mod channel;
pub mod parser;
pub mod poller;
pub mod port_handle;

// Re-exports
pub use channel::CommandLineChannel;
pub use parser::OutputParser;
pub use poller::{shutdown_channel, ChannelPoller, ShutdownSender, ShutdownToken};
pub use port_handle::{make_ports, ChannelPort};
