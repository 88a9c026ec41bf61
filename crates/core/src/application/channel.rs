//! Channel Controller - sequences poll and write cycles over one value cache
//!
//! Data flow:
//! - poll: read command -> OutputParser -> ValueCache (full overwrite)
//! - write: tentative set -> write command (whole cache as env) -> poll
//!
//! At most one command cycle runs per channel at a time (`cycle` mutex);
//! port reads only take a short snapshot lock and never wait on a command.
//! The snapshot lock is never held across an await, so a cycle dropped
//! mid-command can still put the channel back to READY from `Drop`.

use crate::application::parser::OutputParser;
use crate::domain::{
    ChannelConfig, ChannelState, DomainError, PortSpec, PortValue, ValueCache, ValueDescriptor,
};
use crate::error::Result;
use crate::port::{CommandOutput, CommandRequest, CommandRunner};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct ChannelInner {
    cache: ValueCache,
    state: ChannelState,
}

/// Command-line backed channel shared by all of its ports
pub struct CommandLineChannel {
    name: String,
    read_command: String,
    write_command: Option<String>,
    descriptors: Vec<ValueDescriptor>,
    parser: OutputParser,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
    inner: RwLock<ChannelInner>,
    cycle: Mutex<()>,
}

impl CommandLineChannel {
    /// Create a channel; every value starts unknown
    ///
    /// # Errors
    /// DomainError::InvalidConfig if the configuration is inconsistent or
    /// the output pattern does not compile
    pub fn new(config: &ChannelConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        config.validate()?;
        let parser = OutputParser::new(config.output_regexp.as_deref())?;
        let descriptors = config.descriptors();

        debug!(
            channel = %config.name,
            ports = descriptors.len(),
            pattern_mode = parser.is_pattern(),
            writable = config.write_command.is_some(),
            "Channel created"
        );

        Ok(Self {
            name: config.name.clone(),
            read_command: config.read_command.clone(),
            write_command: config.write_command.clone(),
            inner: RwLock::new(ChannelInner {
                cache: ValueCache::new(&descriptors),
                state: ChannelState::Uninitialized,
            }),
            descriptors,
            parser,
            timeout: config.timeout(),
            runner,
            cycle: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptors(&self) -> &[ValueDescriptor] {
        &self.descriptors
    }

    pub fn is_writable(&self) -> bool {
        self.write_command.is_some()
    }

    pub async fn state(&self) -> ChannelState {
        self.read_inner().state
    }

    /// Last known value of a port (`None` = unknown)
    pub async fn read(&self, id: &str) -> Option<PortValue> {
        self.read_inner().cache.get(id)
    }

    /// Snapshot of all values in descriptor order
    pub async fn values(&self) -> Vec<(String, Option<PortValue>)> {
        self.read_inner().cache.snapshot()
    }

    /// One spec per descriptor, for the port registry
    pub fn make_port_specs(&self) -> Vec<PortSpec> {
        self.descriptors
            .iter()
            .map(|d| PortSpec {
                id: d.id.clone(),
                port_type: d.port_type,
                writable: self.is_writable(),
            })
            .collect()
    }

    /// Run the read command and overwrite the cache from its output
    ///
    /// # Errors
    /// AppError::Command on timeout or spawn failure; the cache keeps its
    /// previous values.
    pub async fn poll(&self) -> Result<()> {
        let _cycle = self.cycle.lock().await;
        self.poll_locked().await
    }

    /// Send the whole cache to the write command, then resynchronize
    ///
    /// # Errors
    /// DomainError::ReadOnly without a write command; AppError::Command when
    /// the write or the resync poll fails.
    pub async fn write_all(&self) -> Result<()> {
        let _cycle = self.cycle.lock().await;
        self.write_all_locked().await
    }

    /// Write one port: tentative cache update, write command, resync poll.
    ///
    /// The write command still receives every port's last known value. If
    /// any step fails, or the future is dropped before the cycle completes,
    /// the tentative value is rolled back.
    pub async fn write(&self, id: &str, value: PortValue) -> Result<()> {
        if !self.is_writable() {
            return Err(DomainError::ReadOnly(id.to_string()).into());
        }

        let _cycle = self.cycle.lock().await;

        let previous = {
            let mut inner = self.write_inner();
            if !inner.cache.contains(id) {
                return Err(DomainError::UnknownPort(id.to_string()).into());
            }
            let previous = inner.cache.get(id);
            inner.cache.set(id, Some(value))?;
            previous
        };
        let mut guard = CycleGuard::new(&self.inner).with_rollback(id, previous);

        debug!(channel = %self.name, port = %id, value = %value, "Tentative value set");

        let result = self.write_all_locked().await;
        match &result {
            Ok(()) => guard.commit(),
            Err(_) => debug!(
                channel = %self.name,
                port = %id,
                "Write failed, tentative value rolled back"
            ),
        }

        result
    }

    async fn poll_locked(&self) -> Result<()> {
        let _guard = self.begin_cycle(ChannelState::Polling);

        let request = CommandRequest::new(self.read_command.clone(), self.timeout);
        let output = match self.runner.run(&request).await {
            Ok(output) => output,
            Err(e) => {
                warn!(channel = %self.name, error = %e, "Read command failed");
                return Err(e.into());
            }
        };

        self.log_read_exit_code(&output);
        let values = self.parser.parse(&output, &self.descriptors);

        let mut inner = self.write_inner();
        inner.cache.overwrite(values);

        debug!(
            channel = %self.name,
            duration_ms = output.duration_ms,
            values = ?inner.cache.snapshot(),
            "Poll completed"
        );

        Ok(())
    }

    async fn write_all_locked(&self) -> Result<()> {
        let Some(write_command) = self.write_command.clone() else {
            return Err(DomainError::ReadOnly(self.name.clone()).into());
        };

        let _guard = self.begin_cycle(ChannelState::Writing);
        let env = self.read_inner().cache.to_env();

        let request = CommandRequest::new(write_command, self.timeout).with_env(env);
        match self.runner.run(&request).await {
            Ok(output) if !output.success() => {
                warn!(
                    channel = %self.name,
                    exit_code = output.exit_code,
                    "Write command returned non-zero exit code"
                );
            }
            Ok(output) => {
                info!(
                    channel = %self.name,
                    duration_ms = output.duration_ms,
                    "Write command completed"
                );
            }
            Err(e) => {
                warn!(channel = %self.name, error = %e, "Write command failed");
                return Err(e.into());
            }
        }

        // Only the next read tells what the write actually did
        self.poll_locked().await
    }

    fn log_read_exit_code(&self, output: &CommandOutput) {
        if output.success() {
            return;
        }
        if self.parser.is_pattern() {
            warn!(
                channel = %self.name,
                exit_code = output.exit_code,
                "Read command returned non-zero exit code"
            );
        } else {
            debug!(channel = %self.name, exit_code = output.exit_code, "Read command exit code");
        }
    }

    fn begin_cycle(&self, state: ChannelState) -> CycleGuard<'_> {
        self.write_inner().state = state;
        CycleGuard::new(&self.inner)
    }

    // A panic while holding the lock cannot leave the cache half-written
    // (every update is a single assignment), so poisoning is ignored.
    fn read_inner(&self) -> RwLockReadGuard<'_, ChannelInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, ChannelInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the channel to READY when a cycle ends, however it ends.
///
/// A pending rollback restores the port's previous value unless the write
/// was committed.
struct CycleGuard<'a> {
    inner: &'a RwLock<ChannelInner>,
    rollback: Option<(String, Option<PortValue>)>,
}

impl<'a> CycleGuard<'a> {
    fn new(inner: &'a RwLock<ChannelInner>) -> Self {
        Self {
            inner,
            rollback: None,
        }
    }

    fn with_rollback(mut self, id: &str, previous: Option<PortValue>) -> Self {
        self.rollback = Some((id.to_string(), previous));
        self
    }

    fn commit(&mut self) {
        self.rollback = None;
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some((id, previous)) = self.rollback.take() {
            // The id was checked before the tentative set
            let _ = inner.cache.set(&id, previous);
        }
        inner.state = ChannelState::Ready;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::command_runner::mocks::{MockCommandRunner, MockResponse};
    use crate::port::CommandError;
    use crate::AppError;

    fn two_port_config() -> ChannelConfig {
        ChannelConfig::new(
            "read-sensor",
            vec![ValueDescriptor::boolean("x"), ValueDescriptor::number("temp-1")],
        )
        .with_output_regexp(r"(\w+) (\S+)")
        .with_write_command("write-sensor")
    }

    fn channel(config: &ChannelConfig, runner: Arc<MockCommandRunner>) -> CommandLineChannel {
        CommandLineChannel::new(config, runner).unwrap()
    }

    #[tokio::test]
    async fn test_initially_unknown() {
        let runner = Arc::new(MockCommandRunner::new());
        let channel = channel(&two_port_config(), runner.clone());

        assert_eq!(channel.state().await, ChannelState::Uninitialized);
        assert_eq!(channel.read("x").await, None);
        assert_eq!(channel.read("temp-1").await, None);
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_poll_populates_cache() {
        let runner = Arc::new(MockCommandRunner::with_responses(vec![MockResponse::output(
            "true 21.5",
            0,
        )]));
        let channel = channel(&two_port_config(), runner.clone());

        channel.poll().await.unwrap();

        assert_eq!(channel.state().await, ChannelState::Ready);
        assert_eq!(channel.read("x").await, Some(PortValue::Integer(1)));
        assert_eq!(channel.read("temp-1").await, Some(PortValue::Float(21.5)));

        let requests = runner.requests();
        assert_eq!(requests[0].command, "read-sensor");
        assert_eq!(requests[0].env, None);
        assert_eq!(requests[0].timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_no_match_clears_previous_values() {
        let runner = Arc::new(MockCommandRunner::with_responses(vec![
            MockResponse::output("true 3", 0),
            MockResponse::output("garbage", 0),
        ]));
        let channel = channel(&two_port_config(), runner);

        channel.poll().await.unwrap();
        channel.poll().await.unwrap();

        assert_eq!(
            channel.values().await,
            vec![("x".to_string(), None), ("temp-1".to_string(), None)]
        );
        assert_eq!(channel.state().await, ChannelState::Ready);
    }

    #[tokio::test]
    async fn test_poll_timeout_keeps_cache() {
        let runner = Arc::new(MockCommandRunner::with_responses(vec![
            MockResponse::output("true 3", 0),
            MockResponse::Timeout,
        ]));
        let channel = channel(&two_port_config(), runner);
        channel.poll().await.unwrap();

        let err = channel.poll().await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(channel.read("temp-1").await, Some(PortValue::Integer(3)));
        assert_eq!(channel.state().await, ChannelState::Ready);
    }

    #[tokio::test]
    async fn test_non_zero_read_exit_still_parsed() {
        let runner = Arc::new(MockCommandRunner::with_responses(vec![MockResponse::output(
            "0 4", 1,
        )]));
        let channel = channel(&two_port_config(), runner);

        channel.poll().await.unwrap();

        assert_eq!(channel.read("x").await, Some(PortValue::Integer(0)));
        assert_eq!(channel.read("temp-1").await, Some(PortValue::Integer(4)));
    }

    #[tokio::test]
    async fn test_write_sends_whole_cache_then_polls() {
        let runner = Arc::new(MockCommandRunner::with_responses(vec![
            MockResponse::output("false 7", 0), // initial poll
            MockResponse::output("", 0),        // write
            MockResponse::output("0 7", 0),     // resync poll
        ]));
        let channel = channel(&two_port_config(), runner.clone());
        channel.poll().await.unwrap();

        channel.write("x", PortValue::from(true)).await.unwrap();

        let requests = runner.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].command, "write-sensor");
        let env = requests[1].env.as_ref().unwrap();
        assert_eq!(env.get("x").map(String::as_str), Some("1"));
        assert_eq!(env.get("temp_1").map(String::as_str), Some("7"));
        assert_eq!(requests[2].command, "read-sensor");

        // The resync poll wins over the tentative value
        assert_eq!(channel.read("x").await, Some(PortValue::Integer(0)));
        assert_eq!(channel.state().await, ChannelState::Ready);
    }

    #[tokio::test]
    async fn test_write_unknown_values_as_empty_strings() {
        let runner = Arc::new(MockCommandRunner::new());
        let channel = channel(&two_port_config(), runner.clone());

        channel.write("temp-1", PortValue::Float(2.5)).await.unwrap();

        let env = runner.requests()[0].env.clone().unwrap();
        assert_eq!(env.get("x").map(String::as_str), Some(""));
        assert_eq!(env.get("temp_1").map(String::as_str), Some("2.5"));
    }

    #[tokio::test]
    async fn test_write_non_zero_exit_still_resyncs() {
        let runner = Arc::new(MockCommandRunner::with_responses(vec![
            MockResponse::output("", 3),
            MockResponse::output("true 1", 0),
        ]));
        let channel = channel(&two_port_config(), runner.clone());

        channel.write("x", PortValue::from(false)).await.unwrap();

        assert_eq!(runner.call_count(), 2);
        assert_eq!(channel.read("x").await, Some(PortValue::Integer(1)));
    }

    #[tokio::test]
    async fn test_write_timeout_rolls_back() {
        let runner = Arc::new(MockCommandRunner::with_responses(vec![
            MockResponse::output("0 7", 0),
            MockResponse::Timeout,
        ]));
        let channel = channel(&two_port_config(), runner.clone());
        channel.poll().await.unwrap();

        let err = channel.write("x", PortValue::from(true)).await.unwrap_err();

        assert!(matches!(err, AppError::Command(CommandError::Timeout(_))));
        assert_eq!(channel.read("x").await, Some(PortValue::Integer(0)));
        assert_eq!(channel.state().await, ChannelState::Ready);
        // No resync after a failed write
        assert_eq!(runner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_resync_timeout_rolls_back() {
        let runner = Arc::new(MockCommandRunner::with_responses(vec![
            MockResponse::output("", 0),
            MockResponse::Timeout,
        ]));
        let channel = channel(&two_port_config(), runner);

        let err = channel.write("temp-1", PortValue::Integer(9)).await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(channel.read("temp-1").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_write_rolls_back() {
        let runner = Arc::new(
            MockCommandRunner::with_handler(|_| MockResponse::output("true 3", 0))
                .with_delay(Duration::from_millis(200)),
        );
        let channel = channel(&two_port_config(), runner);
        channel.poll().await.unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            channel.write("temp-1", PortValue::Integer(9)),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(channel.read("temp-1").await, Some(PortValue::Integer(3)));
        assert_eq!(channel.state().await, ChannelState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_resync_rolls_back() {
        let runner = Arc::new(
            MockCommandRunner::with_handler(|_| MockResponse::output("true 3", 0))
                .with_delay(Duration::from_millis(200)),
        );
        let channel = channel(&two_port_config(), runner.clone());

        // Past the write command, inside the resync poll
        let outcome = tokio::time::timeout(
            Duration::from_millis(300),
            channel.write("temp-1", PortValue::Integer(9)),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(runner.call_count(), 2);
        assert_eq!(channel.read("temp-1").await, None);
        assert_eq!(channel.state().await, ChannelState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_poll_returns_to_ready() {
        let runner = Arc::new(
            MockCommandRunner::with_handler(|_| MockResponse::output("true 3", 0))
                .with_delay(Duration::from_millis(200)),
        );
        let channel = channel(&two_port_config(), runner);

        let outcome = tokio::time::timeout(Duration::from_millis(50), channel.poll()).await;

        assert!(outcome.is_err());
        assert_eq!(channel.state().await, ChannelState::Ready);
        assert_eq!(channel.read("x").await, None);

        // The cycle lock was released with the dropped future
        channel.poll().await.unwrap();
        assert_eq!(channel.read("x").await, Some(PortValue::Integer(1)));
    }

    #[tokio::test]
    async fn test_write_read_only_channel() {
        let config = ChannelConfig::new("read", vec![ValueDescriptor::number("n")]);
        let runner = Arc::new(MockCommandRunner::new());
        let channel = channel(&config, runner.clone());

        let err = channel.write("n", PortValue::Integer(1)).await.unwrap_err();

        assert!(matches!(err, AppError::Domain(DomainError::ReadOnly(_))));
        assert!(matches!(
            channel.write_all().await,
            Err(AppError::Domain(DomainError::ReadOnly(_)))
        ));
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_write_unknown_port() {
        let runner = Arc::new(MockCommandRunner::new());
        let channel = channel(&two_port_config(), runner.clone());

        let err = channel.write("nope", PortValue::Integer(1)).await.unwrap_err();

        assert!(matches!(err, AppError::Domain(DomainError::UnknownPort(_))));
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_make_port_specs() {
        let runner = Arc::new(MockCommandRunner::new());
        let writable = channel(&two_port_config(), runner.clone());
        let read_only = channel(
            &ChannelConfig::new("read", vec![ValueDescriptor::number("n")]),
            runner,
        );

        let specs = writable.make_port_specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].id, "x");
        assert_eq!(specs[0].port_type, crate::domain::PortType::Boolean);
        assert!(specs.iter().all(|s| s.writable));
        assert!(!read_only.make_port_specs()[0].writable);
    }

    #[tokio::test]
    async fn test_cycles_are_serialized() {
        let runner = Arc::new(
            MockCommandRunner::with_handler(|_| MockResponse::output("true 1", 0))
                .with_delay(Duration::from_millis(20)),
        );
        let channel = Arc::new(channel(&two_port_config(), runner.clone()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let channel = channel.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    channel.poll().await
                } else {
                    channel.write("temp-1", PortValue::Integer(i)).await
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // 2 polls + 2 x (write + resync)
        assert_eq!(runner.call_count(), 6);
        assert_eq!(runner.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_exit_code_mode_channel() {
        let config = ChannelConfig::new(
            "ping -c1 host",
            vec![ValueDescriptor::boolean("online"), ValueDescriptor::number("code")],
        );
        let runner = Arc::new(MockCommandRunner::with_responses(vec![MockResponse::output(
            "64 bytes from host", 2,
        )]));
        let channel = channel(&config, runner);

        channel.poll().await.unwrap();

        assert_eq!(channel.read("online").await, Some(PortValue::Integer(0)));
        assert_eq!(channel.read("code").await, Some(PortValue::Integer(2)));
    }
}
