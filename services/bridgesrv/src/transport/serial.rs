//! Serial Transport Implementation
//!
//! Line-oriented serial link to the peripheral controller, built on
//! `tokio-serial`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, warn};

use super::traits::{LineTransport, TransportError, TransportStats};

/// Longest line accepted from the controller, terminator excluded
pub const MAX_LINE_BYTES: usize = 4096;

/// How a bounded line read ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineFill {
    /// `pending` holds a whole line (or the tail before end of stream)
    Complete,
    EndOfStream,
    /// More than [`MAX_LINE_BYTES`] without a terminator
    Overlong,
}

/// Read into `pending` until `\n`, end of stream or the line limit
///
/// Bytes already in `pending` count towards the limit, so a read resumed
/// after a timeout can never grow the buffer past `MAX_LINE_BYTES + 1`.
async fn fill_line<R>(reader: &mut R, pending: &mut Vec<u8>) -> std::io::Result<LineFill>
where
    R: AsyncBufRead + Unpin,
{
    let budget = (MAX_LINE_BYTES + 1).saturating_sub(pending.len()) as u64;
    let read = reader.take(budget).read_until(b'\n', pending).await?;

    if pending.ends_with(b"\n") {
        Ok(LineFill::Complete)
    } else if pending.len() > MAX_LINE_BYTES {
        Ok(LineFill::Overlong)
    } else if read == 0 {
        Ok(LineFill::EndOfStream)
    } else {
        Ok(LineFill::Complete)
    }
}

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialTransportConfig {
    /// Serial port path (e.g., "/dev/ttyACM0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity ("None", "Even", "Odd")
    pub parity: String,
    /// Write timeout for individual operations
    pub write_timeout: Duration,
}

impl Default for SerialTransportConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: "None".to_string(),
            write_timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialTransportConfig {
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.port.is_empty() {
            return Err(TransportError::ConfigError(
                "Port path cannot be empty".to_string(),
            ));
        }

        if self.baud_rate == 0 {
            return Err(TransportError::ConfigError(
                "Baud rate must be greater than zero".to_string(),
            ));
        }

        if ![5, 6, 7, 8].contains(&self.data_bits) {
            return Err(TransportError::ConfigError(
                "Data bits must be 5, 6, 7, or 8".to_string(),
            ));
        }

        if ![1, 2].contains(&self.stop_bits) {
            return Err(TransportError::ConfigError(
                "Stop bits must be 1 or 2".to_string(),
            ));
        }

        if !["None", "Even", "Odd"].contains(&self.parity.as_str()) {
            return Err(TransportError::ConfigError(
                "Parity must be None, Even, or Odd".to_string(),
            ));
        }

        Ok(())
    }
}

/// Serial transport implementation
#[derive(Debug)]
pub struct SerialLineTransport {
    config: SerialTransportConfig,
    stream: Option<BufReader<SerialStream>>,
    /// Bytes of a line that has not been terminated yet
    pending: Vec<u8>,
    stats: TransportStats,
}

impl SerialLineTransport {
    /// Create new serial transport with configuration
    pub fn new(config: SerialTransportConfig) -> Result<Self, TransportError> {
        config.validate()?;

        Ok(Self {
            config,
            stream: None,
            pending: Vec::with_capacity(256),
            stats: TransportStats::new(),
        })
    }

    fn parse_parity(&self) -> tokio_serial::Parity {
        match self.config.parity.as_str() {
            "Even" => tokio_serial::Parity::Even,
            "Odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        }
    }

    fn parse_data_bits(&self) -> tokio_serial::DataBits {
        match self.config.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    fn parse_stop_bits(&self) -> tokio_serial::StopBits {
        match self.config.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }

    /// Drop the stream after an I/O failure
    fn mark_broken(&mut self) {
        if self.stream.take().is_some() {
            self.stats.record_disconnection();
        }
        self.pending.clear();
    }
}

#[async_trait]
impl LineTransport for SerialLineTransport {
    fn transport_type(&self) -> &str {
        "serial"
    }

    fn endpoint(&self) -> String {
        format!("{}@{}", self.config.port, self.config.baud_rate)
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            self.disconnect().await?;
        }

        self.stats.record_connection_attempt();
        debug!("Opening serial port: {}", self.config.port);

        let port_result = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .data_bits(self.parse_data_bits())
            .parity(self.parse_parity())
            .stop_bits(self.parse_stop_bits())
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async();

        match port_result {
            Ok(mut port) => {
                #[cfg(unix)]
                port.set_exclusive(false).map_err(|e| {
                    TransportError::ConnectionFailed(format!(
                        "Failed to set exclusive mode: {e}"
                    ))
                })?;

                self.stream = Some(BufReader::new(port));
                self.pending.clear();
                self.stats.record_successful_connection();

                info!("Serial port connected: {}", self.endpoint());
                Ok(())
            },
            Err(e) => {
                let error_msg = format!("Failed to open serial port {}: {e}", self.config.port);
                self.stats.record_failed_connection();
                Err(TransportError::ConnectionFailed(error_msg))
            },
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.stream.take().is_some() {
            // Serial port is closed when dropped
            self.stats.record_disconnection();
            info!("Closed serial port: {}", self.config.port);
        }
        self.pending.clear();
        Ok(())
    }

    async fn read_line(&mut self, read_timeout: Duration) -> Result<Option<String>, TransportError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::NotConnected(
                "Serial port not connected".to_string(),
            ));
        };

        // Partial bytes stay in `pending` if the timeout fires
        match timeout(read_timeout, fill_line(stream, &mut self.pending)).await {
            Err(_) => Ok(None),
            Ok(Ok(LineFill::EndOfStream)) => {
                warn!("Serial port {} reached end of stream", self.config.port);
                self.mark_broken();
                Err(TransportError::ReadFailed("end of stream".to_string()))
            },
            Ok(Ok(LineFill::Overlong)) => {
                let discarded = std::mem::take(&mut self.pending).len();
                self.stats.record_line_received(discarded);
                Err(TransportError::Decode(format!(
                    "no line terminator from {} within {MAX_LINE_BYTES} bytes, {discarded} bytes discarded",
                    self.config.port
                )))
            },
            Ok(Ok(LineFill::Complete)) => {
                let raw = std::mem::take(&mut self.pending);
                self.stats.record_line_received(raw.len());
                match String::from_utf8(raw) {
                    Ok(line) => {
                        let line = line.trim().to_string();
                        debug!(line = %line, direction = "recv", "[Serial Transport] Line");
                        Ok(Some(line))
                    },
                    Err(e) => Err(TransportError::Decode(format!(
                        "invalid UTF-8 from {}: {e}",
                        self.config.port
                    ))),
                }
            },
            Ok(Err(e)) => {
                let error_msg = format!("Failed to read from {}: {e}", self.config.port);
                error!("{error_msg}");
                self.mark_broken();
                Err(TransportError::ReadFailed(error_msg))
            },
        }
    }

    async fn write_bytes(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::NotConnected(
                "Serial port not connected".to_string(),
            ));
        };

        let send_operation = async {
            stream.write_all(data).await?;
            stream.flush().await?;
            Ok::<_, std::io::Error>(data.len())
        };

        match timeout(self.config.write_timeout, send_operation).await {
            Ok(Ok(bytes_sent)) => {
                self.stats.record_bytes_sent(bytes_sent);
                debug!(
                    data = %String::from_utf8_lossy(data).trim_end(),
                    length = bytes_sent,
                    direction = "send",
                    "[Serial Transport] Raw packet"
                );
                Ok(bytes_sent)
            },
            Ok(Err(e)) => {
                let error_msg = format!("Failed to write to {}: {e}", self.config.port);
                error!("{error_msg}");
                self.mark_broken();
                Err(TransportError::WriteFailed(error_msg))
            },
            Err(_) => {
                let error_msg = format!(
                    "Write to {} timed out after {:?}",
                    self.config.port, self.config.write_timeout
                );
                warn!("{error_msg}");
                self.mark_broken();
                Err(TransportError::Timeout(error_msg))
            },
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SerialTransportConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let config = SerialTransportConfig {
            port: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            SerialLineTransport::new(config),
            Err(TransportError::ConfigError(_))
        ));

        let config = SerialTransportConfig {
            baud_rate: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SerialTransportConfig {
            parity: "Mark".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_io_on_closed_port_is_not_connected() {
        let mut transport = SerialLineTransport::new(SerialTransportConfig::default()).unwrap();
        assert!(!transport.is_connected());
        assert_eq!(transport.endpoint(), "/dev/ttyACM0@9600");

        let err = transport.write_bytes(b"V1=1\n").await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected(_)));

        let err = transport
            .read_line(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_fill_line_stops_at_terminator() {
        let mut reader: &[u8] = b"dirty_water,ph:7.0\nclean_water";
        let mut pending = Vec::new();

        assert_eq!(fill_line(&mut reader, &mut pending).await.unwrap(), LineFill::Complete);
        assert_eq!(pending, b"dirty_water,ph:7.0\n");

        // Unterminated tail before end of stream still counts as a line
        pending.clear();
        assert_eq!(fill_line(&mut reader, &mut pending).await.unwrap(), LineFill::Complete);
        assert_eq!(pending, b"clean_water");

        pending.clear();
        assert_eq!(fill_line(&mut reader, &mut pending).await.unwrap(), LineFill::EndOfStream);
    }

    #[tokio::test]
    async fn test_fill_line_caps_unterminated_input() {
        let flood = vec![b'x'; MAX_LINE_BYTES * 4];
        let mut reader: &[u8] = &flood;
        let mut pending = Vec::new();

        assert_eq!(fill_line(&mut reader, &mut pending).await.unwrap(), LineFill::Overlong);
        assert_eq!(pending.len(), MAX_LINE_BYTES + 1);

        // A resumed read never grows past the limit either
        pending.truncate(MAX_LINE_BYTES - 10);
        assert_eq!(fill_line(&mut reader, &mut pending).await.unwrap(), LineFill::Overlong);
        assert_eq!(pending.len(), MAX_LINE_BYTES + 1);
    }

    #[tokio::test]
    async fn test_fill_line_accepts_longest_line() {
        let mut line = vec![b'a'; MAX_LINE_BYTES];
        line.push(b'\n');
        let mut reader: &[u8] = &line;
        let mut pending = Vec::new();

        assert_eq!(fill_line(&mut reader, &mut pending).await.unwrap(), LineFill::Complete);
        assert_eq!(pending.len(), MAX_LINE_BYTES + 1);
    }

    #[tokio::test]
    async fn test_connect_to_missing_port_fails_and_counts() {
        let config = SerialTransportConfig {
            port: "/dev/hydrolink-does-not-exist".to_string(),
            ..Default::default()
        };
        let mut transport = SerialLineTransport::new(config).unwrap();
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::ConnectionFailed(_))
        ));
        let stats = transport.stats();
        assert_eq!(stats.connection_attempts, 1);
        assert_eq!(stats.failed_connections, 1);
    }
}
