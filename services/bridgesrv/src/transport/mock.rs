//! Mock Transport for Testing
//!
//! Scripted stand-in for the peripheral: inbound lines are queued through a
//! [`MockHandle`], writes are recorded, failures can be injected, and every
//! operation is appended to an ordered log so tests can check how reads and
//! writes were interleaved on the link.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::traits::{LineTransport, TransportError, TransportStats};

/// Mock transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockTransportConfig {
    /// Transport name for identification
    pub name: String,
    /// Simulated connection delay
    pub connection_delay: Duration,
    /// Whether connections should fail
    pub should_fail_connection: bool,
    /// When set, every write queues `<prefix><command>` as the next inbound line
    pub auto_reply: Option<String>,
}

impl Default for MockTransportConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            connection_delay: Duration::ZERO,
            should_fail_connection: false,
            auto_reply: Some("OK ".to_string()),
        }
    }
}

/// One entry of the operation log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    Connect,
    Disconnect,
    /// Command written, without its terminator
    Write(String),
    /// Line handed to the reader
    Read(String),
    /// A read that timed out with nothing queued
    Idle,
}

#[derive(Debug)]
enum Inbound {
    Line(String),
    Invalid(Vec<u8>),
}

#[derive(Debug)]
struct MockState {
    connected: bool,
    fail_connection: bool,
    fail_next_read: bool,
    fail_next_write: bool,
    inbound: VecDeque<Inbound>,
    written: Vec<String>,
    log: Vec<MockOp>,
    stats: TransportStats,
}

impl MockState {
    fn new(fail_connection: bool) -> Self {
        Self {
            connected: false,
            fail_connection,
            fail_next_read: false,
            fail_next_write: false,
            inbound: VecDeque::new(),
            written: Vec::new(),
            log: Vec::new(),
            stats: TransportStats::new(),
        }
    }

    fn break_link(&mut self) {
        if self.connected {
            self.connected = false;
            self.stats.record_disconnection();
        }
    }
}

/// Mock transport implementation
#[derive(Debug)]
pub struct MockTransport {
    config: MockTransportConfig,
    state: Arc<Mutex<MockState>>,
}

/// Test-side handle onto a [`MockTransport`]'s shared state
///
/// Stays usable after the transport itself has been boxed into a
/// connection manager.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create new mock transport with configuration
    pub fn new(config: MockTransportConfig) -> Self {
        let state = MockState::new(config.should_fail_connection);
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(MockTransportConfig::default())
    }
}

impl MockHandle {
    /// Queue an inbound line
    pub fn push_line(&self, line: impl Into<String>) {
        self.state.lock().inbound.push_back(Inbound::Line(line.into()));
    }

    pub fn push_lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock();
        for line in lines {
            state.inbound.push_back(Inbound::Line(line.into()));
        }
    }

    /// Queue bytes that are not valid UTF-8
    pub fn push_invalid(&self, bytes: Vec<u8>) {
        self.state.lock().inbound.push_back(Inbound::Invalid(bytes));
    }

    pub fn set_fail_connection(&self, fail: bool) {
        self.state.lock().fail_connection = fail;
    }

    /// The next read fails with an I/O error and drops the link
    pub fn fail_next_read(&self) {
        self.state.lock().fail_next_read = true;
    }

    /// The next write fails with an I/O error and drops the link
    pub fn fail_next_write(&self) {
        self.state.lock().fail_next_write = true;
    }

    /// Simulate the cable being pulled
    pub fn unplug(&self) {
        self.state.lock().break_link();
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn written(&self) -> Vec<String> {
        self.state.lock().written.clone()
    }

    pub fn ops(&self) -> Vec<MockOp> {
        self.state.lock().log.clone()
    }

    pub fn pending_lines(&self) -> usize {
        self.state.lock().inbound.len()
    }

    pub fn connection_attempts(&self) -> u64 {
        self.state.lock().stats.connection_attempts
    }
}

#[async_trait]
impl LineTransport for MockTransport {
    fn transport_type(&self) -> &str {
        "mock"
    }

    fn endpoint(&self) -> String {
        format!("mock://{}", self.config.name)
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if !self.config.connection_delay.is_zero() {
            tokio::time::sleep(self.config.connection_delay).await;
        }

        let mut state = self.state.lock();
        state.stats.record_connection_attempt();
        if state.fail_connection {
            state.stats.record_failed_connection();
            return Err(TransportError::ConnectionFailed(format!(
                "{}: simulated connection failure",
                self.config.name
            )));
        }

        state.connected = true;
        state.stats.record_successful_connection();
        state.log.push(MockOp::Connect);
        debug!("Mock transport '{}' connected", self.config.name);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.connected {
            state.break_link();
            state.log.push(MockOp::Disconnect);
        }
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(TransportError::NotConnected(self.config.name.clone()));
            }
            if state.fail_next_read {
                state.fail_next_read = false;
                state.break_link();
                return Err(TransportError::ReadFailed(
                    "simulated read failure".to_string(),
                ));
            }
            match state.inbound.pop_front() {
                Some(Inbound::Line(line)) => {
                    let line = line.trim().to_string();
                    state.stats.record_line_received(line.len() + 1);
                    state.log.push(MockOp::Read(line.clone()));
                    return Ok(Some(line));
                },
                Some(Inbound::Invalid(bytes)) => {
                    state.stats.record_line_received(bytes.len());
                    return Err(TransportError::Decode(format!(
                        "{} invalid bytes",
                        bytes.len()
                    )));
                },
                None => {},
            }
        }

        // Nothing queued: behave like an idle line
        tokio::time::sleep(timeout).await;
        self.state.lock().log.push(MockOp::Idle);
        Ok(None)
    }

    async fn write_bytes(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected(self.config.name.clone()));
        }
        if state.fail_next_write {
            state.fail_next_write = false;
            state.break_link();
            return Err(TransportError::WriteFailed(
                "simulated write failure".to_string(),
            ));
        }

        let command = String::from_utf8_lossy(data).trim_end().to_string();
        state.stats.record_bytes_sent(data.len());
        state.written.push(command.clone());
        state.log.push(MockOp::Write(command.clone()));
        if let Some(prefix) = &self.config.auto_reply {
            state
                .inbound
                .push_front(Inbound::Line(format!("{prefix}{command}")));
        }
        Ok(data.len())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn stats(&self) -> TransportStats {
        self.state.lock().stats.clone()
    }
}
