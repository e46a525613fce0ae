//! Serial link integration tests
//!
//! Command writes and batch reads share one transport; these tests drive both
//! paths at once against the mock controller and check the operation log.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bridgesrv::bus::RecordingBus;
use bridgesrv::command::DeviceType;
use bridgesrv::transport::{MockOp, MockTransportConfig};
use bridgesrv::{Actuator, Batch, BridgeError, CommandOutcome};
use tokio_util::sync::CancellationToken;

use common::*;

#[tokio::test]
async fn test_commands_and_batch_reads_never_interleave() {
    let (link, handle) = mock_link().await;
    for n in 0..40 {
        handle.push_lines(reading_cycle(n));
    }

    let cancel = CancellationToken::new();
    let mut reader = link.read_batches(cancel.clone());
    let reader_task = tokio::spawn(async move {
        let mut batches: Vec<Batch> = Vec::new();
        while let Some(batch) = reader.next().await {
            batches.push(batch);
        }
        (batches, reader.assembler().discarded())
    });

    let actuator = Actuator::new(Arc::clone(&link));
    let writers: Vec<_> = (0..100u32)
        .map(|i| {
            let actuator = actuator.clone();
            tokio::spawn(async move {
                let device = if i % 2 == 0 { DeviceType::Valve } else { DeviceType::Pump };
                actuator.set_state(device, i % 8 + 1, i % 3 == 0).await
            })
        })
        .collect();

    for writer in writers {
        let reply = writer.await.unwrap().unwrap();
        assert!(reply.starts_with("OK "), "unexpected reply {reply:?}");
    }
    assert!(wait_until(Duration::from_secs(5), || handle.pending_lines() == 0).await);
    cancel.cancel();
    let (batches, discarded) = reader_task.await.unwrap();

    // Every write is immediately followed by its own reply
    let ops = handle.ops();
    let mut writes = 0;
    for (i, op) in ops.iter().enumerate() {
        if let MockOp::Write(command) = op {
            writes += 1;
            assert_eq!(
                ops.get(i + 1),
                Some(&MockOp::Read(format!("OK {command}"))),
                "write {command} was not followed by its reply"
            );
        }
    }
    assert_eq!(writes, 100);

    // No reply ever leaked into a batch, and every reading made it through
    assert_eq!(discarded, 0);
    assert_eq!(batches.len(), 40);
    for (n, batch) in batches.iter().enumerate() {
        assert_eq!(batch.lines(), &reading_cycle(n));
    }

    let stats = link.stats().await;
    assert_eq!(stats.commands_written, 100);
    assert_eq!(stats.commands_failed, 0);
}

#[tokio::test]
async fn test_write_while_disconnected_fails_fast_with_negative_ack() {
    let (link, handle) = mock_link_with(MockTransportConfig {
        should_fail_connection: true,
        ..Default::default()
    })
    .await;
    assert!(!link.is_connected());

    let bus = Arc::new(RecordingBus::new());
    let router = router(&link, &bus);

    let started = Instant::now();
    let outcome = router.route("mfc/ABC123/valve/2", b"OPEN").await;
    assert!(started.elapsed() < Duration::from_millis(100));

    match outcome {
        CommandOutcome::Failed { error, .. } => {
            assert!(matches!(error, BridgeError::TransportUnavailable(_)));
        },
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(bus.payloads_for("mfc/ABC123/valve/2/ack"), vec!["0"]);
    assert!(bus.payloads_for("mfc/ABC123/valve/2/state").is_empty());
    assert!(handle.written().is_empty());
}

#[tokio::test]
async fn test_reader_reconnects_after_unplug_and_resumes() {
    let (link, handle) = mock_link().await;
    let cancel = CancellationToken::new();
    let mut reader = link.read_batches(cancel.clone());

    handle.push_lines(reading_cycle(1));
    let first = reader.next().await.unwrap();
    assert_eq!(first.lines(), &reading_cycle(1));

    handle.unplug();
    handle.push_lines(reading_cycle(2));
    let second = tokio::time::timeout(Duration::from_secs(2), reader.next())
        .await
        .expect("reader resumed")
        .unwrap();
    assert_eq!(second.lines(), &reading_cycle(2));
    assert!(link.is_connected());
    assert!(handle.connection_attempts() >= 2);

    cancel.cancel();
    assert!(reader.next().await.is_none());
}

#[tokio::test]
async fn test_command_after_failed_write_waits_for_reconnect() {
    let (link, handle) = mock_link().await;
    let actuator = Actuator::new(Arc::clone(&link));

    handle.fail_next_write();
    let err = actuator.open_valve(1).await.unwrap_err();
    assert!(matches!(err, BridgeError::TransportIo(_)));
    assert!(!link.is_connected());

    // Commands never reconnect on their own
    let err = actuator.open_valve(1).await.unwrap_err();
    assert!(matches!(err, BridgeError::TransportUnavailable(_)));

    let cancel = CancellationToken::new();
    link.ensure_connected(&cancel).await.unwrap();
    assert_eq!(actuator.open_valve(1).await.unwrap(), "OK V1=1");
    assert_eq!(handle.written(), vec!["V1=1"]);
}
