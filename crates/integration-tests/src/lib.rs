// Shared fixtures for the integration tests

use std::sync::Arc;

use cmdport_core::domain::RunnerConfig;
use cmdport_core::port::time_provider::SystemTimeProvider;
use cmdport_core::port::CommandRunner;
use cmdport_infra_system::ShellCommandRunner;

/// Shell runner with the default environment policy
pub fn shell_runner() -> Arc<dyn CommandRunner> {
    Arc::new(ShellCommandRunner::new(
        Arc::new(SystemTimeProvider),
        &RunnerConfig::default(),
    ))
}
