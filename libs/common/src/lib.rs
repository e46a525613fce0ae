//! HydroLink basic library
//!
//! Provides basic functions shared by all services, including:
//! - logging (console + daily file)
//! - common command-line arguments
//! - startup banner and bootstrap helpers
//! - graceful shutdown signal handling

pub mod bootstrap_args;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use service_bootstrap::ServiceInfo;

// Re-export common dependencies
pub use tokio;
pub use tokio_util::sync::CancellationToken;

// Re-export CLI dependencies when cli feature is enabled
#[cfg(feature = "cli")]
pub use clap;
