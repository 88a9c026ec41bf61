// Command Runner Port
// Abstraction for executing the channel's external commands

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// A single command invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    /// Shell-interpreted command line
    pub command: String,
    /// Environment overlay; `None` inherits the host environment untouched
    pub env: Option<HashMap<String, String>>,
    pub timeout: Duration,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            env: None,
            timeout,
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }
}

/// Result of a completed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Decoded and trimmed standard output
    pub stdout: String,
    /// Decoded and trimmed standard error
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: i64,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code,
            duration_ms: 0,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Command errors
///
/// A non-zero exit code is not an error; it is reported in `CommandOutput`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Timeout waiting for command to complete ({0}ms)")]
    Timeout(u64),

    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Command Runner trait
///
/// Implementations:
/// - ShellCommandRunner (infra-system): `sh -c` with timeout and process-group kill
/// - MockCommandRunner: scripted responses for tests
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion
    ///
    /// # Errors
    /// - CommandError::Timeout if the command outlives `request.timeout`
    ///   (the process is killed and reaped before returning)
    /// - CommandError::SpawnFailed if the shell cannot be started
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted outcome of one invocation
    #[derive(Debug, Clone)]
    pub enum MockResponse {
        Output { stdout: String, exit_code: i32 },
        Timeout,
        SpawnFailed(String),
    }

    impl MockResponse {
        pub fn output(stdout: impl Into<String>, exit_code: i32) -> Self {
            MockResponse::Output {
                stdout: stdout.into(),
                exit_code,
            }
        }
    }

    type Handler = Box<dyn Fn(&CommandRequest) -> MockResponse + Send + Sync>;

    /// Mock Command Runner for testing
    ///
    /// Queued responses are consumed first; afterwards the handler (if any)
    /// answers, otherwise an empty successful output is returned.
    pub struct MockCommandRunner {
        responses: Mutex<VecDeque<MockResponse>>,
        handler: Option<Handler>,
        delay: Option<Duration>,
        requests: Mutex<Vec<CommandRequest>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockCommandRunner {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                handler: None,
                delay: None,
                requests: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        pub fn with_responses(responses: Vec<MockResponse>) -> Self {
            let runner = Self::new();
            runner.responses.lock().unwrap().extend(responses);
            runner
        }

        pub fn with_handler(
            handler: impl Fn(&CommandRequest) -> MockResponse + Send + Sync + 'static,
        ) -> Self {
            Self {
                handler: Some(Box::new(handler)),
                ..Self::new()
            }
        }

        /// Simulate a slow command (each run sleeps before answering)
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn requests(&self) -> Vec<CommandRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        /// Highest number of simultaneously running invocations observed
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    impl Default for MockCommandRunner {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl CommandRunner for MockCommandRunner {
        async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
            self.requests.lock().unwrap().push(request.clone());

            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let queued = self.responses.lock().unwrap().pop_front();
            let response = match (queued, &self.handler) {
                (Some(response), _) => response,
                (None, Some(handler)) => handler(request),
                (None, None) => MockResponse::output("", 0),
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match response {
                MockResponse::Output { stdout, exit_code } => {
                    Ok(CommandOutput::new(stdout, exit_code))
                }
                MockResponse::Timeout => {
                    Err(CommandError::Timeout(request.timeout.as_millis() as u64))
                }
                MockResponse::SpawnFailed(msg) => Err(CommandError::SpawnFailed(msg)),
            }
        }
    }
}
