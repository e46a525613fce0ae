//! Command path integration tests: bus message to serial write to ack/state

mod common;

use std::sync::Arc;

use bridgesrv::bus::{Qos, RecordingBus};
use bridgesrv::command::{Action, DeviceType};
use bridgesrv::subscriber::register_command_handlers;
use bridgesrv::CommandOutcome;

use common::*;

#[tokio::test]
async fn test_duplicate_open_is_acknowledged_twice() {
    let (link, handle) = mock_link().await;
    let bus = Arc::new(RecordingBus::new());
    let router = router(&link, &bus);

    assert!(router.route("mfc/ABC123/valve/2", b"OPEN").await.is_applied());
    assert!(router.route("mfc/ABC123/valve/2", b"OPEN").await.is_applied());

    assert_eq!(handle.written(), vec!["V2=1", "V2=1"]);
    assert_eq!(bus.payloads_for("mfc/ABC123/valve/2/ack"), vec!["1", "1"]);
    assert_eq!(bus.payloads_for("mfc/ABC123/valve/2/state"), vec!["1", "1"]);
    assert!(bus
        .published()
        .iter()
        .all(|m| m.qos == Qos::AtLeastOnce && !m.retain));
}

#[tokio::test]
async fn test_lowercase_open_for_this_device() {
    let (link, handle) = mock_link().await;
    let bus = Arc::new(RecordingBus::new());
    let router = router(&link, &bus);

    match router.route("mfc/ABC123/valve/2", b"open").await {
        CommandOutcome::Applied { command, reply } => {
            assert_eq!(command.device_type, DeviceType::Valve);
            assert_eq!(command.device_number, 2);
            assert_eq!(command.action, Action::Open);
            assert_eq!(reply, "OK V2=1");
        },
        other => panic!("expected the command to apply, got {other:?}"),
    }
    assert_eq!(handle.written(), vec!["V2=1"]);
}

#[tokio::test]
async fn test_malformed_topics_and_payloads_are_dropped() {
    let (link, handle) = mock_link().await;
    let bus = Arc::new(RecordingBus::new());
    let router = router(&link, &bus);

    let cases: [(&str, &[u8]); 7] = [
        ("mfc/ABC123/valve", b"OPEN"),
        ("mfc/ABC123/valve/2/extra", b"OPEN"),
        ("mfc/ABC123/valve/two", b"OPEN"),
        ("mfc/ABC123/valve/-1", b"OPEN"),
        ("mfc/ABC123/heater/1", b"OPEN"),
        ("mfc/ABC123/pump/1", b"TOGGLE"),
        ("mfc/ABC123/pump/1", &[0xff, 0xfe]),
    ];
    for (topic, payload) in cases {
        let outcome = router.route(topic, payload).await;
        assert!(
            matches!(outcome, CommandOutcome::Ignored(_)),
            "{topic} was not ignored: {outcome:?}"
        );
    }

    assert!(handle.written().is_empty());
    assert!(bus.published().is_empty());
    assert!(link.is_connected());
}

#[tokio::test]
async fn test_subscriptions_drive_the_router() {
    let (link, handle) = mock_link().await;
    let bus = Arc::new(RecordingBus::new());
    let count = register_command_handlers(bus.as_ref(), &topics(), Arc::new(router(&link, &bus)))
        .await
        .unwrap();
    assert_eq!(count, 5);

    bus.deliver("hydroponics/ABC123/pump/3", "OPEN").await;
    bus.deliver("mfc_fallback/ABC123/valve/1", "Close").await;
    // Not subscribed
    assert_eq!(bus.deliver("mfc/XYZ999/valve/1", "OPEN").await, 0);
    // Ack topics never loop back into the router
    assert_eq!(bus.deliver("mfc/ABC123/valve/1/ack", "1").await, 0);

    assert_eq!(handle.written(), vec!["P3=1", "V1=0"]);
    assert_eq!(bus.payloads_for("hydroponics/ABC123/pump/3/ack"), vec!["1"]);
    assert_eq!(bus.payloads_for("hydroponics/ABC123/pump/3/state"), vec!["1"]);
    assert_eq!(bus.payloads_for("mfc_fallback/ABC123/valve/1/ack"), vec!["1"]);
    assert_eq!(bus.payloads_for("mfc_fallback/ABC123/valve/1/state"), vec!["0"]);
}
