//! HydroLink Bridge Service (bridgesrv)
//!
//! Connects the appliance's serial controller to the MQTT broker.

use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use bridgesrv::config::{BridgeConfig, ConfigSources, DEFAULT_CONFIG_PATH, DEFAULT_DEVICE_CONFIG_PATH};
use bridgesrv::service::BridgeService;
use common::service_bootstrap::{self, ConfiguredLogging, ServiceInfo};
use common::ServiceArgs;
use errors::{HydroError, HydroErrorTrait, HydroResult};

/// Command-line arguments for bridgesrv
#[derive(Parser, Debug)]
#[command(
    name = "bridgesrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "HydroLink serial-to-MQTT bridge",
    long_about = None
)]
struct Args {
    #[command(flatten)]
    service: ServiceArgs,

    /// Service configuration file (YAML)
    #[arg(short = 'c', long, env = "BRIDGESRV_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Device identity file (JSON)
    #[arg(long, env = "BRIDGESRV_DEVICE_CONFIG", default_value = DEFAULT_DEVICE_CONFIG_PATH)]
    device_config: PathBuf,
}

fn print_topics(config: &BridgeConfig) {
    let topics = config.topic_set();
    println!("Configuration is valid");
    println!("  device:     {}", config.device.serial_number);
    println!("  serial:     {} @ {} baud", config.serial.port, config.serial.baud_rate);
    println!("  broker:     {}:{} (tls: {})", config.mqtt.host, config.mqtt.port, config.mqtt.tls);
    println!("  telemetry:  {}", topics.telemetry());
    println!("  heartbeat:  {}", topics.heartbeat());
    for subscription in topics.command_subscriptions() {
        println!("  commands:   {subscription}");
    }
}

#[tokio::main]
async fn main() -> HydroResult<()> {
    let args = Args::parse();
    let sources = ConfigSources {
        config_file: args.config.clone(),
        device_file: args.device_config.clone(),
    };

    // Logging is not up yet; report configuration errors on stderr
    let config = match BridgeConfig::load(&sources) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return Err(e.into());
        },
    };

    if args.service.validate {
        print_topics(&config);
        return Ok(());
    }

    let service_info = ServiceInfo::new(
        "bridgesrv",
        env!("CARGO_PKG_VERSION"),
        "HydroLink Serial-to-MQTT Bridge",
    );
    service_bootstrap::init_logging(
        &service_info,
        &args.service,
        &ConfiguredLogging {
            level: Some(config.logging.level.as_str()),
            dir: config.logging.dir.as_deref(),
            json: config.logging.json,
        },
    )?;
    if !args.service.no_color {
        service_bootstrap::print_startup_banner(&service_info);
    }
    info!(
        "Configuration loaded from {} and {}",
        sources.config_file.display(),
        sources.device_file.display()
    );

    let shutdown = CancellationToken::new();
    let signal_task = common::shutdown::cancel_on_shutdown(shutdown.clone());

    let result = BridgeService::new(config).run(shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = signal_task.await {
        error!("Signal handler task failed: {e}");
    }

    match result {
        Ok(_) => {
            info!("bridgesrv stopped");
            Ok(())
        },
        Err(e) => {
            error!(code = e.error_code(), "bridgesrv failed: {e}");
            Err(HydroError::from(e))
        },
    }
}
