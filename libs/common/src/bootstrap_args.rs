//! Common command-line arguments for all HydroLink services
//!
//! Provides a unified argument structure that individual services flatten
//! into their own `Args`.

#[cfg(feature = "cli")]
use clap::Args;

/// Common service startup arguments
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "cli", derive(Args))]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error); overrides the configured level
    #[cfg_attr(feature = "cli", arg(short = 'l', long))]
    pub log_level: Option<String>,

    /// Disable colored output (useful for log files)
    #[cfg_attr(feature = "cli", arg(long))]
    pub no_color: bool,

    /// Only validate configuration without starting service
    #[cfg_attr(feature = "cli", arg(long))]
    pub validate: bool,

    /// Log directory override
    #[cfg_attr(feature = "cli", arg(long, env = "HYDRO_LOG_DIR"))]
    pub log_dir: Option<String>,

    /// Console only, no log file
    #[cfg_attr(feature = "cli", arg(long))]
    pub no_log_file: bool,
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestArgs {
        #[command(flatten)]
        service: ServiceArgs,
    }

    #[test]
    fn test_defaults_leave_level_to_configuration() {
        let args = TestArgs::try_parse_from(["bridgesrv"]).unwrap().service;
        assert_eq!(args.log_level, None);
        assert!(!args.validate);
        assert!(!args.no_log_file);
    }

    #[test]
    fn test_flags_parse() {
        let args = TestArgs::try_parse_from([
            "bridgesrv",
            "-l",
            "debug",
            "--validate",
            "--no-color",
            "--log-dir",
            "/tmp/hydro",
        ])
        .unwrap()
        .service;
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.validate);
        assert!(args.no_color);
        assert_eq!(args.log_dir.as_deref(), Some("/tmp/hydro"));
    }
}
