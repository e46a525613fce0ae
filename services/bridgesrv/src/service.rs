//! Service wiring
//!
//! [`Bridge`] runs the three concurrent activities of the appliance against
//! an already opened serial link and message bus:
//!
//! - the telemetry publisher, on the calling task
//! - the heartbeat ticker, on its own task
//! - command handling, driven by the bus dispatch worker
//!
//! [`BridgeService`] builds the real serial port and MQTT client from a
//! [`BridgeConfig`] and tears them down in order once shutdown fires.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actuator::Actuator;
use crate::bus::{MessageBus, MqttBus};
use crate::config::BridgeConfig;
use crate::connection::{ConnectionManager, LinkStats};
use crate::error::Result;
use crate::heartbeat::{HeartbeatTask, NetworkInfo, NmcliNetworkInfo};
use crate::publisher::{PublisherStats, TelemetryPublisher};
use crate::router::CommandRouter;
use crate::subscriber::register_command_handlers;
use crate::topics::TopicSet;
use crate::transport::SerialLineTransport;

/// Upper bound for the MQTT client to flush the offline heartbeat
const BUS_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What a finished run did
#[derive(Debug, Clone)]
pub struct BridgeReport {
    pub telemetry: PublisherStats,
    pub link: LinkStats,
}

/// Bridge between one serial link and one message bus
#[derive(Debug)]
pub struct Bridge {
    link: Arc<ConnectionManager>,
    bus: Arc<dyn MessageBus>,
    topics: TopicSet,
    heartbeat_interval: Duration,
    network: Option<Arc<dyn NetworkInfo>>,
}

impl Bridge {
    pub fn new(
        link: Arc<ConnectionManager>,
        bus: Arc<dyn MessageBus>,
        topics: TopicSet,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            link,
            bus,
            topics,
            heartbeat_interval,
            network: None,
        }
    }

    /// Report the wireless network name once the broker is reachable
    pub fn with_network_info(mut self, network: Arc<dyn NetworkInfo>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn link(&self) -> &Arc<ConnectionManager> {
        &self.link
    }

    /// Run until `shutdown` fires
    ///
    /// Returns after the heartbeat task has stopped and the offline heartbeat
    /// has been handed to the bus. The serial link stays open.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<BridgeReport> {
        let router = Arc::new(CommandRouter::new(
            self.topics.serial_number(),
            Actuator::new(Arc::clone(&self.link)),
            Arc::clone(&self.bus),
        ));
        register_command_handlers(self.bus.as_ref(), &self.topics, router).await?;

        let mut heartbeat = HeartbeatTask::new(
            Arc::clone(&self.bus),
            &self.topics,
            self.heartbeat_interval,
        );
        if let Some(network) = &self.network {
            heartbeat = heartbeat.with_network_info(Arc::clone(network));
        }
        let heartbeat_handle = tokio::spawn(heartbeat.run(shutdown.clone()));

        let mut publisher = TelemetryPublisher::new(Arc::clone(&self.bus), &self.topics);
        let telemetry = publisher
            .drain(self.link.read_batches(shutdown.clone()))
            .await;

        // The offline heartbeat must be the last one on the topic
        if let Err(e) = heartbeat_handle.await {
            error!("Heartbeat task ended abnormally: {e}");
        }
        publisher.shutdown().await;

        Ok(BridgeReport {
            telemetry,
            link: self.link.stats().await,
        })
    }
}

/// The bridge on real hardware
#[derive(Debug)]
pub struct BridgeService {
    config: BridgeConfig,
}

impl BridgeService {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Open the serial port and broker connection, then bridge until
    /// `shutdown` fires
    ///
    /// A serial port that is missing at startup is not fatal; the publisher
    /// keeps reconnecting in the background.
    pub async fn run(self, shutdown: CancellationToken) -> Result<BridgeReport> {
        let transport = SerialLineTransport::new(self.config.serial_transport())?;
        let link = ConnectionManager::open(Box::new(transport), self.config.link_settings()).await;
        if !link.is_connected() {
            warn!(
                "Serial port {} not available yet, will keep retrying",
                link.endpoint()
            );
        }

        // Independent of `shutdown` so the offline heartbeat can still go out
        let bus_cancel = CancellationToken::new();
        let (mqtt, bus_task) = MqttBus::start(&self.config.mqtt_settings(), bus_cancel.clone())?;

        let mut bridge = Bridge::new(
            Arc::clone(&link),
            Arc::clone(&mqtt) as Arc<dyn MessageBus>,
            self.config.topic_set(),
            Duration::from_secs(self.config.heartbeat.interval_secs),
        );
        if self.config.heartbeat.publish_network_name {
            bridge = bridge.with_network_info(Arc::new(NmcliNetworkInfo::default()));
        }

        info!(
            "Bridging {} to {} as device {}",
            link.endpoint(),
            mqtt.endpoint(),
            self.config.device.serial_number
        );
        let result = bridge.run(shutdown).await;

        if let Err(e) = mqtt.disconnect().await {
            warn!("MQTT disconnect request failed: {e}");
        }
        match tokio::time::timeout(BUS_DRAIN_TIMEOUT, bus_task).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => error!("MQTT task ended abnormally: {e}"),
            Err(_) => warn!("MQTT client did not stop within {BUS_DRAIN_TIMEOUT:?}"),
        }
        bus_cancel.cancel();

        if let Ok(report) = &result {
            info!(
                published = report.telemetry.published,
                dropped = report.telemetry.dropped,
                commands_written = report.link.commands_written,
                commands_failed = report.link.commands_failed,
                bytes_sent = report.link.transport.bytes_sent,
                bytes_received = report.link.transport.bytes_received,
                disconnections = report.link.transport.disconnections,
                reconnects = report.link.reconnect.successful_reconnects,
                "Bridge statistics"
            );
            match serde_json::to_string(&report.link) {
                Ok(json) => debug!("Link statistics: {json}"),
                Err(e) => debug!("Link statistics not serializable: {e}"),
            }
        }
        link.close().await;
        result
    }
}
