//! In-memory message bus
//!
//! Records every publish and delivers injected messages straight to the
//! registered handlers. Drives the command and telemetry paths in tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{dispatch, HandlerRegistry, InboundMessage, MessageBus, MessageHandler, Qos, SharedRegistry};
use crate::error::{BridgeError, Result};

/// One recorded publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Debug)]
pub struct RecordingBus {
    registry: SharedRegistry,
    published: Mutex<Vec<PublishedMessage>>,
    connected: AtomicBool,
}

impl Default for RecordingBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBus {
    /// A connected bus with no subscriptions
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(HandlerRegistry::new())),
            published: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Simulate the broker going away or coming back
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Deliver a message as if it came from the broker
    ///
    /// Returns the number of handlers that ran.
    pub async fn deliver(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        let message = InboundMessage::new(topic, payload);
        dispatch(&self.registry, &message).await
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    /// Payloads published on `topic`, in order
    pub fn payloads_for(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .map(PublishedMessage::payload_str)
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }

    pub fn patterns(&self) -> Vec<String> {
        self.registry.read().patterns()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, topic: &str, payload: &[u8], qos: Qos, retain: bool) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::broker(format!(
                "cannot publish to '{topic}': broker offline"
            )));
        }
        self.published.lock().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.registry.write().register(pattern, handler);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
