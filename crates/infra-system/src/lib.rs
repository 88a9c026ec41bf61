// cmdport Infrastructure - System Adapters
// Implements: CommandRunner (shell), configuration loading

pub mod config_loader;
pub mod shell_runner;

pub use config_loader::{load_config, load_config_str, AppConfig};
pub use shell_runner::ShellCommandRunner;
