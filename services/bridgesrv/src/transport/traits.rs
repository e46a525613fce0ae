//! Transport Layer Traits
//!
//! The peripheral speaks a newline-delimited text protocol, so the transport
//! abstraction is line oriented: read one line, write raw bytes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Transport layer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Opening the link failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation attempted on a closed link
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Write failed mid-operation
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Read failed mid-operation
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// Received bytes were not valid UTF-8
    #[error("Decode error: {0}")]
    Decode(String),

    /// Timeout occurred
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Connection state for transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Transport is disconnected
    Disconnected,
    /// Transport is attempting to connect
    Connecting,
    /// Transport is connected and ready
    Connected,
    /// Transport has encountered an error
    Error,
}

/// Transport statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Complete lines received
    pub lines_received: u64,
    /// Number of connection attempts
    pub connection_attempts: u64,
    /// Number of successful connections
    pub successful_connections: u64,
    /// Number of failed connections
    pub failed_connections: u64,
    /// Number of disconnections
    pub disconnections: u64,
    /// Last successful connection time
    pub last_connection: Option<SystemTime>,
    /// Current connection state
    pub connection_state: ConnectionState,
}

impl TransportStats {
    /// Create new transport statistics
    pub fn new() -> Self {
        Self {
            bytes_sent: 0,
            bytes_received: 0,
            lines_received: 0,
            connection_attempts: 0,
            successful_connections: 0,
            failed_connections: 0,
            disconnections: 0,
            last_connection: None,
            connection_state: ConnectionState::Disconnected,
        }
    }

    pub fn record_connection_attempt(&mut self) {
        self.connection_attempts += 1;
        self.connection_state = ConnectionState::Connecting;
    }

    pub fn record_successful_connection(&mut self) {
        self.successful_connections += 1;
        self.last_connection = Some(SystemTime::now());
        self.connection_state = ConnectionState::Connected;
    }

    pub fn record_failed_connection(&mut self) {
        self.failed_connections += 1;
        self.connection_state = ConnectionState::Error;
    }

    pub fn record_disconnection(&mut self) {
        self.disconnections += 1;
        self.connection_state = ConnectionState::Disconnected;
    }

    pub fn record_bytes_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
    }

    pub fn record_line_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.lines_received += 1;
    }

    /// Reset all statistics
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for TransportStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Duplex line transport to the peripheral controller
#[async_trait]
pub trait LineTransport: Send + Sync + fmt::Debug {
    /// Get transport type identifier
    fn transport_type(&self) -> &str;

    /// Human readable endpoint, e.g. `/dev/ttyACM0@9600`
    fn endpoint(&self) -> String;

    /// Open the link. Opening an already open link closes and reopens it.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Close the link. Closing a closed link is a no-op.
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Read one line, without its terminator
    ///
    /// # Returns
    ///
    /// `Ok(None)` when nothing complete arrived within `timeout`,
    /// `Ok(Some(line))` for a complete line (possibly empty).
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError>;

    /// Write raw bytes and flush
    async fn write_bytes(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Whether the link is currently open
    fn is_connected(&self) -> bool;

    /// Snapshot of transport statistics
    fn stats(&self) -> TransportStats;
}
