//! Common test utilities and helpers

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bridgesrv::bus::{MessageBus, RecordingBus};
use bridgesrv::connection::{ConnectionManager, LinkSettings};
use bridgesrv::reconnect::ReconnectPolicy;
use bridgesrv::router::CommandRouter;
use bridgesrv::topics::{default_subscription_templates, TopicSet};
use bridgesrv::transport::{MockHandle, MockTransport, MockTransportConfig};
use bridgesrv::Actuator;

pub const SERIAL: &str = "ABC123";

/// Link timings short enough for tests
pub fn fast_settings() -> LinkSettings {
    LinkSettings {
        read_timeout: Duration::from_millis(5),
        settle_delay: Duration::from_millis(1),
        reconnect: ReconnectPolicy {
            max_attempts: 0,
            poll_interval: Duration::from_millis(5),
            backoff: Duration::from_millis(1),
            jitter: false,
        },
    }
}

/// A connected link over a mock controller that echoes `OK <command>`
pub async fn mock_link() -> (Arc<ConnectionManager>, MockHandle) {
    mock_link_with(MockTransportConfig::default()).await
}

pub async fn mock_link_with(config: MockTransportConfig) -> (Arc<ConnectionManager>, MockHandle) {
    let transport = MockTransport::new(config);
    let handle = transport.handle();
    let link = ConnectionManager::open(Box::new(transport), fast_settings()).await;
    (link, handle)
}

pub fn topics() -> TopicSet {
    TopicSet::new("mfc", SERIAL, &default_subscription_templates())
}

pub fn router(link: &Arc<ConnectionManager>, bus: &Arc<RecordingBus>) -> CommandRouter {
    CommandRouter::new(
        SERIAL,
        Actuator::new(Arc::clone(link)),
        Arc::clone(bus) as Arc<dyn MessageBus>,
    )
}

/// One full reading cycle in stage order
pub fn reading_cycle(n: usize) -> [String; 3] {
    [
        format!("dirty_water,ph:7.{n},turbidity:{n}"),
        format!("clean_water,ph:7.{n},tds:{n}"),
        format!("hydroponics_water,ec:{n}"),
    ]
}

/// Poll `condition` until it holds or `limit` elapses
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
