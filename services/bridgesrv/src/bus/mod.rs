//! Message bus abstraction
//!
//! The bridge publishes and subscribes through [`MessageBus`]. Subscriptions
//! are an explicit mapping from topic pattern to [`MessageHandler`], kept in a
//! [`HandlerRegistry`]. Inbound messages are handed to a single dispatch
//! worker that calls matching handlers one message at a time, in arrival
//! order, off the network task.
//!
//! Handlers run sequentially: a slow handler delays the next message but
//! never the broker connection itself.

pub mod mqtt;
pub mod recording;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::Result;

pub use mqtt::{MqttBus, MqttSettings};
pub use recording::{PublishedMessage, RecordingBus};

/// Delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn from_level(level: u8) -> Self {
        match level {
            1 => Qos::AtLeastOnce,
            2 => Qos::ExactlyOnce,
            _ => Qos::AtMostOnce,
        }
    }
}

/// Message received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Callback for inbound messages
///
/// Runs on the bus's dispatch worker; keep it short.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &InboundMessage);
}

/// Publish/subscribe client
#[async_trait]
pub trait MessageBus: Send + Sync + fmt::Debug {
    /// Publish `payload` on `topic`
    ///
    /// Fails with `BrokerUnavailable` while the broker is unreachable.
    async fn publish(&self, topic: &str, payload: &[u8], qos: Qos, retain: bool) -> Result<()>;

    /// Register `handler` for every topic matching `pattern`
    ///
    /// The subscription is kept across broker reconnects.
    async fn subscribe(&self, pattern: &str, handler: Arc<dyn MessageHandler>) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Whether `topic` matches the subscription `pattern` (`+` and `#` wildcards)
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {},
            (Some(p), Some(t)) if p == t => {},
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Topic pattern to handler mapping
#[derive(Default)]
pub struct HandlerRegistry {
    entries: Vec<(String, Arc<dyn MessageHandler>)>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("patterns", &self.patterns())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pattern: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.entries.push((pattern.into(), handler));
    }

    /// Handlers whose pattern matches `topic`, in registration order
    ///
    /// A handler registered under several matching patterns is returned once.
    pub fn matching(&self, topic: &str) -> Vec<Arc<dyn MessageHandler>> {
        let mut handlers: Vec<Arc<dyn MessageHandler>> = Vec::new();
        for (pattern, handler) in &self.entries {
            if topic_matches(pattern, topic) && !handlers.iter().any(|h| Arc::ptr_eq(h, handler)) {
                handlers.push(Arc::clone(handler));
            }
        }
        handlers
    }

    /// Distinct registered patterns, in registration order
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = Vec::new();
        for (pattern, _) in &self.entries {
            if !patterns.contains(pattern) {
                patterns.push(pattern.clone());
            }
        }
        patterns
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type SharedRegistry = Arc<RwLock<HandlerRegistry>>;

/// Deliver `message` to every matching handler, returning how many ran
pub async fn dispatch(registry: &SharedRegistry, message: &InboundMessage) -> usize {
    let handlers = registry.read().matching(&message.topic);
    if handlers.is_empty() {
        debug!(topic = %message.topic, "No handler for inbound message");
    }
    for handler in &handlers {
        trace!(topic = %message.topic, "Dispatching inbound message");
        handler.handle(message).await;
    }
    handlers.len()
}

/// Spawn the dispatch worker
///
/// Runs until every sender of `rx` is dropped.
pub fn spawn_dispatcher(
    registry: SharedRegistry,
    mut rx: mpsc::UnboundedReceiver<InboundMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            dispatch(&registry, &message).await;
        }
        debug!("Message dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageHandler for Collect {
        async fn handle(&self, message: &InboundMessage) {
            self.seen.lock().push(message.topic.clone());
        }
    }

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("mfc/ABC123/valve/+", "mfc/ABC123/valve/2"));
        assert!(topic_matches("mfc/#", "mfc/ABC123/valve/2"));
        assert!(topic_matches("mfc/ABC123/valve/2", "mfc/ABC123/valve/2"));
        assert!(!topic_matches("mfc/ABC123/valve/+", "mfc/ABC123/valve/2/ack"));
        assert!(!topic_matches("mfc/ABC123/valve/+", "mfc/ABC123/valve"));
        assert!(!topic_matches("mfc/ABC123/pump/+", "mfc/ABC123/valve/2"));
        assert!(!topic_matches("mfc/+/valve/+", "hydroponics/ABC123/valve/2"));
    }

    #[test]
    fn test_qos_from_level() {
        assert_eq!(Qos::from_level(0), Qos::AtMostOnce);
        assert_eq!(Qos::from_level(1), Qos::AtLeastOnce);
        assert_eq!(Qos::from_level(2), Qos::ExactlyOnce);
        assert_eq!(Qos::from_level(7), Qos::AtMostOnce);
    }

    #[test]
    fn test_registry_dedups_handlers_and_patterns() {
        let handler: Arc<dyn MessageHandler> = Arc::new(Collect::default());
        let mut registry = HandlerRegistry::new();
        registry.register("mfc/ABC123/valve/+", Arc::clone(&handler));
        registry.register("mfc/#", Arc::clone(&handler));
        registry.register("mfc/ABC123/valve/+", Arc::clone(&handler));

        assert_eq!(registry.matching("mfc/ABC123/valve/1").len(), 1);
        assert_eq!(registry.matching("other/topic").len(), 0);
        assert_eq!(registry.patterns(), vec!["mfc/ABC123/valve/+", "mfc/#"]);
    }

    #[tokio::test]
    async fn test_dispatcher_preserves_arrival_order() {
        let collect = Arc::new(Collect::default());
        let registry: SharedRegistry = Arc::new(RwLock::new(HandlerRegistry::new()));
        registry
            .write()
            .register("mfc/+/valve/+", Arc::clone(&collect) as Arc<dyn MessageHandler>);

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = spawn_dispatcher(Arc::clone(&registry), rx);
        for n in 1..=20 {
            tx.send(InboundMessage::new(format!("mfc/ABC123/valve/{n}"), "OPEN"))
                .unwrap();
        }
        tx.send(InboundMessage::new("mfc/ABC123/pump/1", "OPEN")).unwrap();
        drop(tx);
        worker.await.unwrap();

        let seen = collect.seen.lock().clone();
        let expected: Vec<String> = (1..=20).map(|n| format!("mfc/ABC123/valve/{n}")).collect();
        assert_eq!(seen, expected);
    }
}
