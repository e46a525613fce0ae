//! Unified error handling for HydroLink services
//!
//! Service crates keep their own domain error types (e.g. `BridgeError`) and
//! expose a common interface by implementing [`HydroErrorTrait`]. Anything
//! that has to leave a service boundary (the binary's `main`, startup code)
//! is converted into [`HydroError`].

use thiserror::Error;

// ============================================================================
// HydroError - service-level error type
// ============================================================================

/// Main error type for HydroLink service boundaries
#[derive(Debug, Error)]
pub enum HydroError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ======================================
    // Communication Errors
    // ======================================
    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Service startup failed: {0}")]
    StartupFailed(String),
}

/// Result type alias using HydroError
pub type HydroResult<T> = Result<T, HydroError>;

impl HydroErrorTrait for HydroError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::StartupFailed(_) => "STARTUP_FAILED",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Communication(_) | Self::ServiceUnavailable(_) => ErrorCategory::Network,
            Self::ConnectionFailed { .. } => ErrorCategory::Connection,
            Self::StartupFailed(_) => ErrorCategory::Internal,
        }
    }
}

// ============================================================================
// HydroLink Error Trait - Architectural layer
// ============================================================================

/// Error category enum - used for classification and log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    // Infrastructure layer
    Configuration,
    Network,

    // Device link layer
    Connection,
    Protocol,

    // Business logic layer
    Rejected,

    // System level
    Internal,
}

/// HydroLink error capability trait
///
/// Each service keeps its own domain-specific error type and gains a common
/// interface by implementing this trait.
pub trait HydroErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for logs)
    fn error_code(&self) -> &'static str;

    /// Get error category
    fn category(&self) -> ErrorCategory;

    /// Whether the error is retryable (default implementation is category-based)
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::Connection
        )
    }

    /// Get log level
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Configuration | ErrorCategory::Internal => Level::ERROR,
            ErrorCategory::Network
            | ErrorCategory::Connection
            | ErrorCategory::Protocol
            | ErrorCategory::Rejected => Level::WARN,
        }
    }
}
