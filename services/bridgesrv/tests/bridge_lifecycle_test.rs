//! End-to-end runs of the bridge against the mock controller and an
//! in-memory bus

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridgesrv::bus::{MessageBus, RecordingBus};
use bridgesrv::heartbeat::NetworkInfo;
use bridgesrv::Bridge;
use tokio_util::sync::CancellationToken;

use common::*;

#[derive(Debug)]
struct Greenhouse;

#[async_trait]
impl NetworkInfo for Greenhouse {
    async fn current_network(&self) -> Option<String> {
        Some("Greenhouse".to_string())
    }
}

#[tokio::test]
async fn test_full_run_publishes_telemetry_handles_commands_and_goes_offline() {
    let (link, handle) = mock_link().await;
    let bus = Arc::new(RecordingBus::new());
    let bridge = Bridge::new(
        Arc::clone(&link),
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        topics(),
        Duration::from_millis(20),
    )
    .with_network_info(Arc::new(Greenhouse));

    let shutdown = CancellationToken::new();
    let run = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { bridge.run(shutdown).await })
    };

    handle.push_lines(reading_cycle(1));
    assert!(
        wait_until(Duration::from_secs(2), || {
            !bus.payloads_for("mfc/ABC123/sensor_data").is_empty() && !bus.patterns().is_empty()
        })
        .await
    );

    assert_eq!(bus.deliver("mfc/ABC123/pump/4", "OPEN").await, 1);
    handle.push_lines(reading_cycle(2));
    assert!(
        wait_until(Duration::from_secs(2), || {
            bus.payloads_for("mfc/ABC123/sensor_data").len() == 2
        })
        .await
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.telemetry.published, 2);
    assert_eq!(report.telemetry.dropped, 0);
    assert_eq!(report.link.commands_written, 1);

    let telemetry = bus.payloads_for("mfc/ABC123/sensor_data");
    assert_eq!(
        telemetry[0],
        format!("device_serial_number:ABC123\n{}", reading_cycle(1).join("\n"))
    );
    assert_eq!(
        telemetry[1],
        format!("device_serial_number:ABC123\n{}", reading_cycle(2).join("\n"))
    );

    assert_eq!(handle.written(), vec!["P4=1"]);
    assert_eq!(bus.payloads_for("mfc/ABC123/pump/4/ack"), vec!["1"]);
    assert_eq!(bus.payloads_for("mfc/ABC123/pump/4/state"), vec!["1"]);
    assert_eq!(bus.payloads_for("mfc/ABC123/wifi"), vec!["Greenhouse"]);

    let beats = bus.payloads_for("mfc/ABC123/heartbeat");
    assert!(beats.len() >= 2, "heartbeats: {beats:?}");
    let (last, online) = beats.split_last().unwrap();
    assert_eq!(last, "0");
    assert!(online.iter().all(|b| b == "1"));

    // The bridge leaves closing the link to its owner
    assert!(link.is_connected());
    link.close().await;
    assert!(!handle.is_connected());
}

#[tokio::test]
async fn test_telemetry_dropped_while_broker_is_down() {
    let (link, handle) = mock_link().await;
    let bus = Arc::new(RecordingBus::new());
    bus.set_connected(false);
    let bridge = Bridge::new(
        link,
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        topics(),
        Duration::from_secs(45),
    );

    let shutdown = CancellationToken::new();
    let run = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { bridge.run(shutdown).await })
    };

    handle.push_lines(reading_cycle(1));
    assert!(wait_until(Duration::from_secs(2), || handle.pending_lines() == 0).await);
    tokio::time::sleep(Duration::from_millis(20)).await;

    bus.set_connected(true);
    handle.push_lines(reading_cycle(2));
    assert!(
        wait_until(Duration::from_secs(2), || {
            !bus.payloads_for("mfc/ABC123/sensor_data").is_empty()
        })
        .await
    );

    shutdown.cancel();
    let report = run.await.unwrap().unwrap();
    assert_eq!(report.telemetry.published, 1);
    assert_eq!(report.telemetry.dropped, 1);

    // Nothing is replayed once the broker is back
    let telemetry = bus.payloads_for("mfc/ABC123/sensor_data");
    assert_eq!(telemetry.len(), 1);
    assert!(telemetry[0].contains("ec:2"));
    assert_eq!(
        bus.payloads_for("mfc/ABC123/heartbeat").last().map(String::as_str),
        Some("0")
    );
}
