//! MQTT implementation of [`MessageBus`] on top of `rumqttc`
//!
//! One task drives the `rumqttc` event loop: it tracks connection state,
//! re-subscribes every registered pattern on each ConnAck and forwards
//! inbound publishes to the dispatch worker. When the broker is unreachable
//! the loop keeps retrying at a fixed interval and publishes fail fast with
//! `BrokerUnavailable`.

use async_trait::async_trait;
use parking_lot::RwLock;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS, Transport};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{spawn_dispatcher, HandlerRegistry, InboundMessage, MessageBus, MessageHandler, Qos, SharedRegistry};
use crate::error::{BridgeError, Result};

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// TLS with the platform trust roots
    pub tls: bool,
    /// TLS pinned to this CA instead of the platform roots
    pub ca_cert_path: Option<PathBuf>,
    pub keep_alive: Duration,
    /// Wait between failed connection attempts
    pub reconnect_interval: Duration,
    /// Request channel capacity of the client
    pub channel_capacity: usize,
    /// Topic and payload the broker publishes if we vanish
    pub last_will: Option<(String, Vec<u8>)>,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            client_id: "bridgesrv".to_string(),
            username: None,
            password: None,
            tls: true,
            ca_cert_path: None,
            keep_alive: Duration::from_secs(60),
            reconnect_interval: Duration::from_secs(5),
            channel_capacity: 64,
            last_will: None,
        }
    }
}

impl MqttSettings {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Translate into `rumqttc` options
    pub fn to_options(&self) -> Result<MqttOptions> {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username, password);
        }

        if let Some(ca_path) = &self.ca_cert_path {
            let ca = std::fs::read(ca_path).map_err(|e| {
                BridgeError::config(format!(
                    "cannot read CA certificate {}: {e}",
                    ca_path.display()
                ))
            })?;
            options.set_transport(Transport::tls(ca, None, None));
        } else if self.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        if let Some((topic, payload)) = &self.last_will {
            options.set_last_will(LastWill::new(
                topic,
                payload.clone(),
                QoS::AtLeastOnce,
                false,
            ));
        }

        Ok(options)
    }
}

fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// MQTT message bus
pub struct MqttBus {
    client: AsyncClient,
    registry: SharedRegistry,
    connected: Arc<AtomicBool>,
    endpoint: String,
}

impl fmt::Debug for MqttBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttBus")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl MqttBus {
    /// Create the client and spawn its event loop and dispatch worker
    ///
    /// The returned handle completes once the event loop has stopped, either
    /// after [`MqttBus::disconnect`] or when `cancel` fires, and the dispatch
    /// worker has drained.
    pub fn start(settings: &MqttSettings, cancel: CancellationToken) -> Result<(Arc<Self>, JoinHandle<()>)> {
        let options = settings.to_options()?;
        let (client, eventloop) = AsyncClient::new(options, settings.channel_capacity);

        let bus = Arc::new(Self {
            client: client.clone(),
            registry: Arc::new(RwLock::new(HandlerRegistry::new())),
            connected: Arc::new(AtomicBool::new(false)),
            endpoint: settings.endpoint(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = spawn_dispatcher(Arc::clone(&bus.registry), rx);

        let driver = EventLoopDriver {
            eventloop,
            client,
            registry: Arc::clone(&bus.registry),
            connected: Arc::clone(&bus.connected),
            inbound: tx,
            reconnect_interval: settings.reconnect_interval,
            endpoint: settings.endpoint(),
        };
        let handle = tokio::spawn(async move {
            driver.run(cancel).await;
            if let Err(e) = dispatcher.await {
                warn!("Message dispatcher ended abnormally: {e}");
            }
        });

        info!("MQTT client started for {}", bus.endpoint);
        Ok((bus, handle))
    }

    /// Request a clean disconnect
    ///
    /// Publishes queued before this call go out first.
    pub async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await?;
        Ok(())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: &[u8], qos: Qos, retain: bool) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::broker(format!(
                "not connected to {}, dropping publish to '{topic}'",
                self.endpoint
            )));
        }
        self.client
            .publish(topic, to_mqtt_qos(qos), retain, payload.to_vec())
            .await?;
        debug!(topic = %topic, bytes = payload.len(), "Published");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.registry.write().register(pattern, handler);
        // Otherwise the next ConnAck subscribes it
        if self.is_connected() {
            self.client.subscribe(pattern, QoS::AtLeastOnce).await?;
        }
        info!("Subscribed to {pattern}");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct EventLoopDriver {
    eventloop: EventLoop,
    client: AsyncClient,
    registry: SharedRegistry,
    connected: Arc<AtomicBool>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    reconnect_interval: Duration,
    endpoint: String,
}

impl EventLoopDriver {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    self.connected.store(true, Ordering::SeqCst);
                    info!("Connected to MQTT broker {} ({:?})", self.endpoint, ack.code);
                    self.resubscribe();
                },
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.clone(),
                    };
                    if self.inbound.send(message).is_err() {
                        warn!("Message dispatcher gone, dropping {}", publish.topic);
                    }
                },
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!("Subscription acknowledged: {:?}", ack.return_codes);
                },
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("Disconnected from MQTT broker {}", self.endpoint);
                    break;
                },
                Ok(_) => {},
                Err(e) => {
                    if self.connected.swap(false, Ordering::SeqCst) {
                        warn!("MQTT connection to {} lost: {e}", self.endpoint);
                    } else {
                        debug!("MQTT broker {} unreachable: {e}", self.endpoint);
                    }
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(self.reconnect_interval) => {},
                    }
                },
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        debug!("MQTT event loop stopped");
    }

    fn resubscribe(&self) {
        let patterns = self.registry.read().patterns();
        for pattern in patterns {
            if let Err(e) = self.client.try_subscribe(pattern.as_str(), QoS::AtLeastOnce) {
                warn!("Failed to subscribe to {pattern}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_options_from_settings() {
        let settings = MqttSettings {
            host: "broker.example.com".to_string(),
            port: 8883,
            client_id: "hydrolink-ABC123".to_string(),
            username: Some("device".to_string()),
            password: Some("secret".to_string()),
            keep_alive: Duration::from_secs(30),
            last_will: Some(("mfc/ABC123/heartbeat".to_string(), b"0".to_vec())),
            ..Default::default()
        };
        let options = settings.to_options().unwrap();

        assert_eq!(
            options.broker_address(),
            ("broker.example.com".to_string(), 8883)
        );
        assert_eq!(options.client_id(), "hydrolink-ABC123");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(options.last_will().is_some());
    }

    #[test]
    fn test_missing_ca_file_is_a_config_error() {
        let settings = MqttSettings {
            ca_cert_path: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..Default::default()
        };
        assert!(matches!(settings.to_options(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_ca_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "-----BEGIN CERTIFICATE-----").unwrap();
        let settings = MqttSettings {
            ca_cert_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(settings.to_options().is_ok());
    }

    #[tokio::test]
    async fn test_publish_fails_fast_without_broker() {
        let settings = MqttSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            tls: false,
            reconnect_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let (bus, handle) = MqttBus::start(&settings, cancel.clone()).unwrap();

        let err = bus
            .publish("mfc/ABC123/heartbeat", b"1", Qos::AtLeastOnce, false)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::BrokerUnavailable(_)));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!bus.is_connected());
    }
}
