//! Error handling for the bridge service
//!
//! Every failure the bridge can run into maps onto one of a handful of
//! variants. None of them is fatal at runtime: transport and protocol errors
//! are handled where they occur and surface only through logs and negative
//! acknowledgements.

use errors::{ErrorCategory, HydroError, HydroErrorTrait};
use thiserror::Error;

use crate::transport::TransportError;

/// Bridge service error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// No physical connection to the peripheral
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The transport failed in the middle of an operation
    #[error("Transport I/O error: {0}")]
    TransportIo(String),

    /// Malformed sensor line, topic or payload
    #[error("Protocol parse error: {0}")]
    ProtocolParse(String),

    /// Broker connect/auth/publish failure
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// Unknown device type, number or action
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for the bridge service
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Log an error at the level its category calls for
///
/// Attaches the error code and whether a retry may help. Remaining arguments
/// are passed to the `tracing` macro as is.
macro_rules! log_error {
    ($err:expr, $($arg:tt)+) => {{
        let err = &$err;
        let code = ::errors::HydroErrorTrait::error_code(err);
        let retryable = ::errors::HydroErrorTrait::is_retryable(err);
        match ::errors::HydroErrorTrait::log_level(err) {
            ::tracing::Level::ERROR => ::tracing::error!(code, retryable, $($arg)+),
            ::tracing::Level::WARN => ::tracing::warn!(code, retryable, $($arg)+),
            ::tracing::Level::INFO => ::tracing::info!(code, retryable, $($arg)+),
            _ => ::tracing::debug!(code, retryable, $($arg)+),
        }
    }};
}
pub(crate) use log_error;

impl BridgeError {
    pub fn transport_unavailable(msg: impl Into<String>) -> Self {
        BridgeError::TransportUnavailable(msg.into())
    }

    pub fn transport_io(msg: impl Into<String>) -> Self {
        BridgeError::TransportIo(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        BridgeError::ProtocolParse(msg.into())
    }

    pub fn broker(msg: impl Into<String>) -> Self {
        BridgeError::BrokerUnavailable(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        BridgeError::CommandRejected(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        BridgeError::Config(msg.into())
    }
}

impl HydroErrorTrait for BridgeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::TransportUnavailable(_) => "TRANSPORT_UNAVAILABLE",
            Self::TransportIo(_) => "TRANSPORT_IO",
            Self::ProtocolParse(_) => "PROTOCOL_PARSE",
            Self::BrokerUnavailable(_) => "BROKER_UNAVAILABLE",
            Self::CommandRejected(_) => "COMMAND_REJECTED",
            Self::Config(_) => "CONFIGURATION_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::TransportUnavailable(_) | Self::TransportIo(_) => ErrorCategory::Connection,
            Self::ProtocolParse(_) => ErrorCategory::Protocol,
            Self::BrokerUnavailable(_) => ErrorCategory::Network,
            Self::CommandRejected(_) => ErrorCategory::Rejected,
            Self::Config(_) => ErrorCategory::Configuration,
        }
    }
}

impl From<TransportError> for BridgeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected(msg) | TransportError::ConnectionFailed(msg) => {
                BridgeError::TransportUnavailable(msg)
            },
            TransportError::ConfigError(msg) => BridgeError::Config(msg),
            other => BridgeError::TransportIo(other.to_string()),
        }
    }
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        BridgeError::BrokerUnavailable(err.to_string())
    }
}

impl From<figment::Error> for BridgeError {
    fn from(err: figment::Error) -> Self {
        BridgeError::Config(err.to_string())
    }
}

impl From<BridgeError> for HydroError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Config(msg) => HydroError::Configuration(msg),
            BridgeError::TransportUnavailable(msg) => HydroError::ConnectionFailed {
                endpoint: "serial".to_string(),
                reason: msg,
            },
            BridgeError::BrokerUnavailable(msg) => HydroError::ServiceUnavailable(msg),
            other => HydroError::Communication(other.to_string()),
        }
    }
}
