//! Liveness heartbeat
//!
//! Publishes `"1"` on the heartbeat topic at a fixed interval and, once
//! after startup, the name of the wireless network the appliance is on.
//! Runs as its own task so a slow broker never holds up telemetry.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{MessageBus, Qos};
use crate::topics::TopicSet;

/// How often to check for the broker while it is unreachable
const BROKER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Source of the current wireless network name
#[async_trait]
pub trait NetworkInfo: Send + Sync + fmt::Debug {
    /// `None` when not associated or the probe failed
    async fn current_network(&self) -> Option<String>;
}

/// Queries NetworkManager through `nmcli`
#[derive(Debug, Clone)]
pub struct NmcliNetworkInfo {
    program: String,
}

impl Default for NmcliNetworkInfo {
    fn default() -> Self {
        Self {
            program: "nmcli".to_string(),
        }
    }
}

impl NmcliNetworkInfo {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// Active SSID from `nmcli -t -f ACTIVE,SSID dev wifi` output
pub fn parse_active_ssid(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("yes:"))
        .map(|ssid| ssid.replace("\\:", ":"))
        .filter(|ssid| !ssid.is_empty())
}

#[async_trait]
impl NetworkInfo for NmcliNetworkInfo {
    async fn current_network(&self) -> Option<String> {
        let output = Command::new(&self.program)
            .args(["-t", "-f", "ACTIVE,SSID", "dev", "wifi"])
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                parse_active_ssid(&String::from_utf8_lossy(&output.stdout))
            },
            Ok(output) => {
                warn!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                None
            },
            Err(e) => {
                warn!("Failed to run {}: {e}", self.program);
                None
            },
        }
    }
}

/// Periodic heartbeat publisher
#[derive(Debug)]
pub struct HeartbeatTask {
    bus: Arc<dyn MessageBus>,
    heartbeat_topic: String,
    network_topic: String,
    interval: Duration,
    network: Option<Arc<dyn NetworkInfo>>,
}

impl HeartbeatTask {
    pub fn new(bus: Arc<dyn MessageBus>, topics: &TopicSet, interval: Duration) -> Self {
        Self {
            bus,
            heartbeat_topic: topics.heartbeat(),
            network_topic: topics.network_name(),
            interval,
            network: None,
        }
    }

    /// Also publish the network name once
    pub fn with_network_info(mut self, network: Arc<dyn NetworkInfo>) -> Self {
        self.network = Some(network);
        self
    }

    /// Publish one online heartbeat
    pub async fn beat(&self) -> bool {
        match self
            .bus
            .publish(&self.heartbeat_topic, b"1", Qos::AtLeastOnce, false)
            .await
        {
            Ok(()) => {
                debug!("Heartbeat sent");
                true
            },
            Err(e) => {
                debug!("Heartbeat skipped: {e}");
                false
            },
        }
    }

    /// Probe and publish the network name
    ///
    /// Returns `false` only when the publish should be retried.
    pub async fn publish_network_name(&self) -> bool {
        let Some(network) = &self.network else {
            return true;
        };
        let Some(name) = network.current_network().await else {
            info!("No active wireless network to report");
            return true;
        };

        match self
            .bus
            .publish(&self.network_topic, name.as_bytes(), Qos::AtLeastOnce, false)
            .await
        {
            Ok(()) => {
                info!("Reported wireless network '{name}'");
                true
            },
            Err(e) => {
                debug!("Network name not published yet: {e}");
                false
            },
        }
    }

    /// Wait until the bus reports a broker connection
    ///
    /// Returns `false` if `cancel` fires first.
    async fn wait_for_broker(&self, cancel: &CancellationToken) -> bool {
        while !self.bus.is_connected() {
            tokio::select! {
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep(BROKER_POLL_INTERVAL) => {},
            }
        }
        true
    }

    /// Run until `cancel` fires
    ///
    /// The first beat goes out as soon as the broker is reachable. A beat
    /// that fails is repeated as soon as the broker is back rather than a
    /// full interval later.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Heartbeat every {:?} on {}",
            self.interval, self.heartbeat_topic
        );
        if !self.wait_for_broker(&cancel).await {
            debug!("Heartbeat task stopped before the broker was reachable");
            return;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut network_reported = self.network.is_none();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }

            if !self.beat().await {
                if !self.wait_for_broker(&cancel).await {
                    break;
                }
                self.beat().await;
                ticker.reset();
            }
            if !network_reported {
                network_reported = self.publish_network_name().await;
            }
        }
        debug!("Heartbeat task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RecordingBus;
    use crate::topics::default_subscription_templates;

    #[derive(Debug)]
    struct FixedNetwork(Option<&'static str>);

    #[async_trait]
    impl NetworkInfo for FixedNetwork {
        async fn current_network(&self) -> Option<String> {
            self.0.map(String::from)
        }
    }

    fn topics() -> TopicSet {
        TopicSet::new("mfc", "ABC123", &default_subscription_templates())
    }

    #[test]
    fn test_parse_active_ssid() {
        let output = "no:Neighbour\nyes:Greenhouse\\:North\nno:\n";
        assert_eq!(parse_active_ssid(output).as_deref(), Some("Greenhouse:North"));
        assert_eq!(parse_active_ssid("no:Neighbour\n"), None);
        assert_eq!(parse_active_ssid("yes:\n"), None);
        assert_eq!(parse_active_ssid(""), None);
    }

    #[tokio::test]
    async fn test_missing_nmcli_yields_none() {
        let probe = NmcliNetworkInfo::new("/nonexistent/nmcli");
        assert_eq!(probe.current_network().await, None);
    }

    #[tokio::test]
    async fn test_heartbeats_and_single_network_report() {
        let bus = Arc::new(RecordingBus::new());
        let task = HeartbeatTask::new(
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            &topics(),
            Duration::from_millis(10),
        )
        .with_network_info(Arc::new(FixedNetwork(Some("Greenhouse"))));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(55)).await;
        cancel.cancel();
        handle.await.unwrap();

        let beats = bus.payloads_for("mfc/ABC123/heartbeat");
        assert!(beats.len() >= 3, "only {} heartbeats", beats.len());
        assert!(beats.iter().all(|b| b == "1"));
        assert_eq!(bus.payloads_for("mfc/ABC123/wifi"), vec!["Greenhouse"]);
    }

    #[tokio::test]
    async fn test_first_beat_waits_for_broker() {
        let bus = Arc::new(RecordingBus::new());
        bus.set_connected(false);
        let task = HeartbeatTask::new(
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            &topics(),
            Duration::from_secs(45),
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bus.payloads_for("mfc/ABC123/heartbeat").is_empty());

        // Online well before the 45 s interval comes round
        bus.set_connected(true);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while bus.payloads_for("mfc/ABC123/heartbeat").is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "no heartbeat after reconnect");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bus.payloads_for("mfc/ABC123/heartbeat"), vec!["1"]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_broker() {
        let bus = Arc::new(RecordingBus::new());
        bus.set_connected(false);
        let task = HeartbeatTask::new(
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            &topics(),
            Duration::from_secs(45),
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task.run(cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_network_name_retried_until_broker_is_back() {
        let bus = Arc::new(RecordingBus::new());
        let task = HeartbeatTask::new(
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            &topics(),
            Duration::from_secs(45),
        )
        .with_network_info(Arc::new(FixedNetwork(Some("Greenhouse"))));

        bus.set_connected(false);
        assert!(!task.beat().await);
        assert!(!task.publish_network_name().await);

        bus.set_connected(true);
        assert!(task.publish_network_name().await);
        assert_eq!(bus.payloads_for("mfc/ABC123/wifi"), vec!["Greenhouse"]);
    }

    #[tokio::test]
    async fn test_no_network_is_not_retried() {
        let bus = Arc::new(RecordingBus::new());
        let task = HeartbeatTask::new(
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            &topics(),
            Duration::from_secs(45),
        )
        .with_network_info(Arc::new(FixedNetwork(None)));
        assert!(task.publish_network_name().await);
        assert!(bus.published().is_empty());
    }
}
