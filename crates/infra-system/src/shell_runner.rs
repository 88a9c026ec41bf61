// Shell command runner
// reason: async-trait, tokio for async process management; nix for process-group signals
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use cmdport_core::domain::{EnvMode, RunnerConfig};
use cmdport_core::port::{CommandError, CommandOutput, CommandRequest, CommandRunner, TimeProvider};

/// Time a timed-out command gets to exit after SIGTERM before SIGKILL
pub const KILL_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Shell command runner
/// Runs each command through the host shell in its own process group
pub struct ShellCommandRunner {
    time_provider: Arc<dyn TimeProvider>,
    env_mode: EnvMode,
    env_allowlist: Vec<String>,
}

impl ShellCommandRunner {
    /// Create a new shell runner
    ///
    /// # Arguments
    /// * `time_provider` - Time provider for duration tracking
    /// * `config` - Environment handling for commands given an overlay
    ///
    /// # Example
    /// ```ignore
    /// let runner = ShellCommandRunner::new(
    ///     Arc::new(SystemTimeProvider),
    ///     &RunnerConfig::default(),
    /// );
    /// ```
    pub fn new(time_provider: Arc<dyn TimeProvider>, config: &RunnerConfig) -> Self {
        Self {
            time_provider,
            env_mode: config.env_mode,
            env_allowlist: config.inherit_env.clone(),
        }
    }

    /// Filter environment variables to allowlist only
    fn filter_env(&self, env: &HashMap<String, String>) -> HashMap<String, String> {
        env.iter()
            .filter(|(k, _)| self.env_allowlist.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn build_command(&self, request: &CommandRequest) -> Command {
        let mut command = shell_command(&request.command);

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(overlay) = &request.env {
            if self.env_mode == EnvMode::Replace {
                let host: HashMap<String, String> = std::env::vars_os()
                    .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                    .collect();
                command.env_clear().envs(self.filter_env(&host));
            }
            command.envs(overlay);
        }

        command
    }

    /// Spawn the shell and wait for output, killing it on timeout
    async fn spawn_and_wait(
        &self,
        request: &CommandRequest,
    ) -> Result<(Vec<u8>, Vec<u8>, ExitStatus), CommandError> {
        let mut child = self
            .build_command(request)
            .spawn()
            .map_err(|e| CommandError::SpawnFailed(e.to_string()))?;
        // Captured now: once the shell is reaped `id()` is gone, but its group may live on
        let pid = child.id();

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| CommandError::Io("stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| CommandError::Io("stderr not captured".to_string()))?;

        // Drain both pipes while waiting so a chatty command cannot block
        let collect = async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (out_res, err_res, status) = tokio::join!(
                stdout.read_to_end(&mut out),
                stderr.read_to_end(&mut err),
                child.wait()
            );
            out_res?;
            err_res?;
            Ok::<_, std::io::Error>((out, err, status?))
        };

        let result = timeout(request.timeout, collect).await;

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => {
                self.terminate(&mut child, pid).await;
                Err(CommandError::Io(e.to_string()))
            }
            Err(_) => {
                warn!(
                    command = %request.command,
                    timeout_ms = request.timeout.as_millis() as u64,
                    "Command timed out, terminating"
                );
                self.terminate(&mut child, pid).await;
                Err(CommandError::Timeout(request.timeout.as_millis() as u64))
            }
        }
    }

    /// SIGTERM the process group, then SIGKILL it; always reaps the child
    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;
            use nix::unistd::Pid;

            if let Some(pid) = pid {
                let group = Pid::from_raw(pid as i32);

                signal_group(group, Signal::SIGTERM);
                match timeout(KILL_GRACE_PERIOD, child.wait()).await {
                    Ok(Ok(status)) => {
                        debug!(pid = %pid, status = %status, "Process exited after SIGTERM");
                        // Leftover members of the group
                        signal_group(group, Signal::SIGKILL);
                        return;
                    }
                    _ => {
                        warn!(pid = %pid, "Process did not exit after SIGTERM, sending SIGKILL");
                        signal_group(group, Signal::SIGKILL);
                    }
                }
            }
        }

        #[cfg(not(unix))]
        let _ = pid;

        // Kill (if still running) and wait, so no zombie is left behind
        if let Err(e) = child.kill().await {
            debug!(error = %e, "Kill after timeout failed (process already gone)");
        }
    }

    fn build_output(
        &self,
        stdout: &[u8],
        stderr: &[u8],
        status: ExitStatus,
        duration_ms: i64,
    ) -> CommandOutput {
        CommandOutput {
            stdout: String::from_utf8_lossy(stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
            exit_code: exit_code(status),
            duration_ms,
        }
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
        let start_time = self.time_provider.now_millis();

        debug!(
            command = %request.command,
            env_vars = request.env.as_ref().map(|e| e.len()),
            timeout_ms = request.timeout.as_millis() as u64,
            "Executing command"
        );

        let (stdout, stderr, status) = self.spawn_and_wait(request).await?;

        let duration_ms = self.time_provider.now_millis() - start_time;
        let output = self.build_output(&stdout, &stderr, status, duration_ms);

        if !output.stderr.is_empty() {
            warn!(
                command = %request.command,
                stderr = %escape_newlines(&output.stderr),
                "Command returned stderr"
            );
        }

        debug!(
            command = %request.command,
            duration_ms = %duration_ms,
            exit_code = output.exit_code,
            "Command completed"
        );

        Ok(output)
    }
}

#[cfg(unix)]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line).process_group(0);
    command
}

#[cfg(not(unix))]
fn shell_command(command_line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(command_line);
    command
}

#[cfg(unix)]
fn signal_group(group: nix::unistd::Pid, signal: nix::sys::signal::Signal) {
    // ESRCH just means the whole group is already gone
    if let Err(e) = nix::sys::signal::killpg(group, signal) {
        debug!(pgid = %group, signal = ?signal, error = %e, "killpg failed");
    }
}

/// Keep a multi-line stderr on one log line
fn escape_newlines(text: &str) -> String {
    text.replace("\r\n", "\\n").replace('\n', "\\n")
}

/// Exit code, or the negated signal number for a signal-terminated process
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    -1
}
