//! Telemetry publisher loop
//!
//! Drains complete batches from the serial link and publishes them on the
//! device's telemetry topic, prefixed with the serial number:
//!
//! ```text
//! device_serial_number:ABC123
//! dirty_water,ph:7.0
//! clean_water,ph:7.2
//! hydroponics_water,ec:1000
//! ```
//!
//! Batches that cannot be published while the broker is away are dropped;
//! nothing is persisted locally.

use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::batch::Batch;
use crate::bus::{MessageBus, Qos};
use crate::connection::BatchReader;
use crate::error::{log_error, Result};
use crate::topics::TopicSet;

/// Telemetry payload for `batch`
pub fn format_envelope(serial_number: &str, batch: &Batch) -> String {
    format!("device_serial_number:{serial_number}\n{}", batch.to_payload())
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub published: u64,
    pub dropped: u64,
}

#[derive(Debug)]
pub struct TelemetryPublisher {
    bus: Arc<dyn MessageBus>,
    serial_number: String,
    telemetry_topic: String,
    heartbeat_topic: String,
    stats: PublisherStats,
}

impl TelemetryPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, topics: &TopicSet) -> Self {
        Self {
            bus,
            serial_number: topics.serial_number().to_string(),
            telemetry_topic: topics.telemetry(),
            heartbeat_topic: topics.heartbeat(),
            stats: PublisherStats::default(),
        }
    }

    pub fn stats(&self) -> PublisherStats {
        self.stats
    }

    pub async fn publish_batch(&mut self, batch: &Batch) -> Result<()> {
        let payload = format_envelope(&self.serial_number, batch);
        match self
            .bus
            .publish(&self.telemetry_topic, payload.as_bytes(), Qos::AtLeastOnce, false)
            .await
        {
            Ok(()) => {
                self.stats.published += 1;
                debug!(topic = %self.telemetry_topic, "Batch published");
                Ok(())
            },
            Err(e) => {
                self.stats.dropped += 1;
                Err(e)
            },
        }
    }

    /// Mark the device offline on the heartbeat topic
    pub async fn publish_offline(&self) -> Result<()> {
        self.bus
            .publish(&self.heartbeat_topic, b"0", Qos::AtLeastOnce, false)
            .await
    }

    /// Publish batches until the reader is cancelled
    pub async fn drain(&mut self, reader: BatchReader) -> PublisherStats {
        info!("Publishing telemetry on {}", self.telemetry_topic);

        let batches = reader.into_stream();
        futures::pin_mut!(batches);
        while let Some(batch) = batches.next().await {
            debug!("Batch received:\n{batch}");
            if let Err(e) = self.publish_batch(&batch).await {
                log_error!(e, "Dropping batch: {e}");
            }
        }

        info!(
            published = self.stats.published,
            dropped = self.stats.dropped,
            "Telemetry publisher stopped"
        );
        self.stats
    }

    /// Final offline heartbeat, best effort
    pub async fn shutdown(&self) {
        match self.publish_offline().await {
            Ok(()) => info!("Offline heartbeat published"),
            Err(e) => warn!("Could not publish offline heartbeat: {e}"),
        }
    }
}
