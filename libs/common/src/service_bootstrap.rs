//! Unified service bootstrap utilities
//!
//! Startup banner and logging initialization shared by HydroLink services.

use crate::bootstrap_args::ServiceArgs;
use crate::logging::{self, LogConfig};
use tracing::info;

/// Service metadata for startup
pub struct ServiceInfo {
    /// Service name (e.g., "bridgesrv")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    /// Create new service info
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

/// Print unified startup banner for any service
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
 ██╗  ██╗██╗   ██╗██████╗ ██████╗  ██████╗
 ██║  ██║╚██╗ ██╔╝██╔══██╗██╔══██╗██╔═══██╗
 ███████║ ╚████╔╝ ██║  ██║██████╔╝██║   ██║
 ██╔══██║  ╚██╔╝  ██║  ██║██╔══██╗██║   ██║
 ██║  ██║   ██║   ██████╔╝██║  ██║╚██████╔╝
 ╚═╝  ╚═╝   ╚═╝   ╚═════╝ ╚═╝  ╚═╝ ╚═════╝
    "#;

    info!("{}", banner);
    info!("");
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!("");
}

/// Logging settings taken from the service configuration file
#[derive(Debug, Clone, Default)]
pub struct ConfiguredLogging<'a> {
    pub level: Option<&'a str>,
    pub dir: Option<&'a str>,
    pub json: bool,
}

/// Initialize logging for a service from its command-line arguments
///
/// `--log-level` wins over the configured level; `RUST_LOG` wins over both.
///
/// Log root directory priority:
/// 1. HYDRO_LOG_DIR environment variable / `--log-dir`
/// 2. `configured.dir` from the service configuration
/// 3. Default "logs"
pub fn init_logging(
    service: &ServiceInfo,
    args: &ServiceArgs,
    configured: &ConfiguredLogging<'_>,
) -> errors::HydroResult<()> {
    let log_root = match args.log_dir.as_deref() {
        Some(dir) if !dir.is_empty() => std::path::PathBuf::from(dir),
        _ => logging::resolve_log_root(configured.dir),
    };

    let level = args
        .log_level
        .as_deref()
        .or(configured.level)
        .unwrap_or("info");

    let config = LogConfig {
        service_name: service.name.clone(),
        log_dir: log_root.join(&service.name),
        level: level.to_string(),
        enable_json: configured.json,
        ansi: !args.no_color,
        enable_file: !args.no_log_file,
    };

    logging::init_with_config(config)
        .map_err(|e| errors::HydroError::StartupFailed(format!("logging: {}", e)))
}
