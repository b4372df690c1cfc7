//! Connection-level behavior over a scripted transport: identification,
//! resynchronization, validation, and fused-device failover.

use std::sync::Arc;

use edmo_host::protocol::framing;
use edmo_host::{DeviceConnection, DeviceEvent, FusedDevice};
use edmo_test_utils::{
    identification_frame, identification_payload, sample_imu, sample_state, time_frame,
    MockChannel,
};
use edmo_types::LinkStatus;
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

async fn wait_for_status(connection: &DeviceConnection, expected: LinkStatus) {
    let mut status = connection.watch_status();
    loop {
        let current = *status.borrow_and_update();
        if current == expected {
            return;
        }
        assert!(
            !current.is_terminal(),
            "connection reached {current:?} while waiting for {expected:?}"
        );
        status.changed().await.expect("status sender dropped");
    }
}

async fn identified(
    mock: &MockChannel,
    cancel: &CancellationToken,
    identifier: &str,
    hues: &[u16],
    locked: bool,
) -> Arc<DeviceConnection> {
    let connection = DeviceConnection::spawn(mock.channel(), cancel);
    mock.feed(&identification_frame(identifier, hues, locked));
    wait_for_status(&connection, LinkStatus::Connected).await;
    connection
}

/// Collect events until the channel would block, giving spawned tasks a
/// chance to run first.
async fn settled_events(events: &mut broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
    sleep(Duration::from_millis(5)).await;
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

#[tokio::test(start_paused = true)]
async fn identification_sets_a_coherent_identity() {
    let cancel = CancellationToken::new();
    let mock = MockChannel::connected("mock:snake1");
    let connection = DeviceConnection::spawn(mock.channel(), &cancel);

    // Deliver the identification reply in adversarial three-byte chunks.
    let wire = identification_frame("Snake1", &[0, 120, 240, 360], false);
    for chunk in wire.chunks(3) {
        mock.feed(chunk);
    }
    wait_for_status(&connection, LinkStatus::Connected).await;

    let identity = connection.identity().expect("identity set");
    assert_eq!(identity.identifier, "Snake1");
    assert_eq!(identity.oscillator_count, 4);
    assert_eq!(identity.arm_hues, [0, 120, 240, 360]);
    assert!(!identity.is_locked);
}

#[tokio::test(start_paused = true)]
async fn connection_sends_the_identification_command_first() {
    let cancel = CancellationToken::new();
    let mut mock = MockChannel::connected("mock:snake1");
    let _connection = DeviceConnection::spawn(mock.channel(), &cancel);

    let frame = mock.next_write().await.expect("identify written");
    let payloads = {
        let mut assembler = framing::FrameAssembler::new();
        let mut payloads = Vec::new();
        assembler.extend(&frame, |payload| payloads.push(payload));
        payloads
    };
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0][0], 0);
    // Tag byte plus the 128-bit host lock key.
    assert_eq!(payloads[0].len(), 17);
}

#[tokio::test(start_paused = true)]
async fn garbage_before_a_frame_is_discarded() {
    let cancel = CancellationToken::new();
    let mock = MockChannel::connected("mock:snake1");
    let connection = identified(&mock, &cancel, "Snake1", &[0, 120], false).await;

    let mut events = connection.subscribe();
    mock.feed(&[0xFF, 0xFF, 0x45, 0x44, 0x02, 0xFF, 0x00, 0x00, 0x00, 0x4D, 0x4F]);

    let collected = settled_events(&mut events).await;
    assert!(
        matches!(collected.as_slice(), [DeviceEvent::TimeReceived(0xFF)]),
        "expected exactly one time event, got {collected:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn silent_channel_fails_validation_and_closes() {
    let cancel = CancellationToken::new();
    let mock = MockChannel::connected("mock:mute");
    let connection = DeviceConnection::spawn(mock.channel(), &cancel);

    let mut status = connection.watch_status();
    while !status.borrow_and_update().is_terminal() {
        status.changed().await.expect("status sender dropped");
    }
    assert_eq!(*status.borrow(), LinkStatus::Failed);
    assert!(mock.is_closed());
}

#[tokio::test(start_paused = true)]
async fn undecodable_payloads_surface_as_unknown_packets() {
    let cancel = CancellationToken::new();
    let mock = MockChannel::connected("mock:snake1");
    let connection = identified(&mock, &cancel, "Snake1", &[0, 120], false).await;

    let mut events = connection.subscribe();
    // Unknown tag.
    mock.feed_frame(&[0x2A, 1, 2, 3]);
    // Known tag, truncated body.
    mock.feed_frame(&[0x02, 0xFF]);

    let collected = settled_events(&mut events).await;
    assert_eq!(collected.len(), 2);
    for event in &collected {
        assert!(matches!(event, DeviceEvent::UnknownPacket(_)), "got {event:?}");
    }
    // A malformed payload never demotes the connection.
    assert_eq!(connection.status(), LinkStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn lock_flag_changes_fire_an_event() {
    let cancel = CancellationToken::new();
    let mock = MockChannel::connected("mock:snake1");
    let connection = identified(&mock, &cancel, "Snake1", &[0, 120], false).await;

    let mut events = connection.subscribe();
    mock.feed(&identification_frame("Snake1", &[0, 120], true));
    let collected = settled_events(&mut events).await;
    assert!(
        matches!(collected.as_slice(), [DeviceEvent::LockStateChanged(true)]),
        "got {collected:?}"
    );

    // Re-announcing the same flag is not a change.
    mock.feed(&identification_frame("Snake1", &[0, 120], true));
    assert!(settled_events(&mut events).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn combined_report_fans_out_in_order() {
    let cancel = CancellationToken::new();
    let mock = MockChannel::connected("mock:snake1");
    let connection = identified(&mock, &cancel, "Snake1", &[0, 120], false).await;

    let states = [sample_state(1.0), sample_state(2.0)];
    let imu = sample_imu();
    let mut events = connection.subscribe();
    mock.feed(&edmo_test_utils::all_data_frame(777, &states, &imu));

    let collected = settled_events(&mut events).await;
    assert_eq!(collected.len(), 4);
    assert!(matches!(collected[0], DeviceEvent::TimeReceived(777)));
    assert!(
        matches!(&collected[1], DeviceEvent::OscillationData { index: 0, state } if *state == states[0])
    );
    assert!(
        matches!(&collected[2], DeviceEvent::OscillationData { index: 1, state } if *state == states[1])
    );
    assert!(matches!(&collected[3], DeviceEvent::ImuData(received) if *received == imu));
}

#[tokio::test(start_paused = true)]
async fn empty_fused_device_projects_nothing() {
    let fused = FusedDevice::new("Ghost");
    assert_eq!(fused.oscillator_count(), 0);
    assert!(fused.arm_hues().is_empty());
    assert!(!fused.is_locked());
    assert_eq!(fused.member_count(), 0);
    // Write with no members is a silent no-op.
    fused.write_command(&edmo_host::protocol::Command::GetTime);
}

#[tokio::test(start_paused = true)]
async fn failover_promotes_the_standby_silently() {
    let cancel = CancellationToken::new();
    let serial_mock = MockChannel::connected("mock:serial");
    let udp_mock = MockChannel::connected("mock:udp");
    let serial_conn = identified(&serial_mock, &cancel, "Snake1", &[0, 120], false).await;
    let udp_conn = identified(&udp_mock, &cancel, "Snake1", &[0, 120], false).await;

    let fused = FusedDevice::new("Snake1");
    fused.add(serial_conn.clone());
    fused.add(udp_conn.clone());
    assert_eq!(fused.member_count(), 2);

    let mut events = fused.subscribe();

    // Traffic on the active member surfaces.
    for time in 0..10u32 {
        serial_mock.feed(&time_frame(time));
    }
    let collected = settled_events(&mut events).await;
    assert_eq!(collected.len(), 10);

    // Traffic on the standby does not.
    udp_mock.feed(&time_frame(99));
    assert!(settled_events(&mut events).await.is_empty());

    // The active channel dies; the standby is promoted.
    assert!(!fused.remove(&serial_conn));
    assert_eq!(fused.member_count(), 1);

    udp_mock.feed(&time_frame(100));
    let collected = settled_events(&mut events).await;
    assert!(
        matches!(collected.as_slice(), [DeviceEvent::TimeReceived(100)]),
        "got {collected:?}"
    );

    // Writes now route through the promoted member.
    fused.write_command(&edmo_host::protocol::Command::GetTime);
    let mut udp_mock = udp_mock;
    let mut saw_get_time = false;
    while let Some(frame) = udp_mock.try_next_write() {
        let mut assembler = framing::FrameAssembler::new();
        assembler.extend(&frame, |payload| saw_get_time |= payload == [0x02]);
    }
    assert!(saw_get_time);

    // Last member out empties the device.
    assert!(fused.remove(&udp_conn));
    assert_eq!(fused.oscillator_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn malformed_identification_keeps_waiting() {
    let cancel = CancellationToken::new();
    let mock = MockChannel::connected("mock:anon");
    let connection = DeviceConnection::spawn(mock.channel(), &cancel);

    let mut events = connection.subscribe();
    // Empty identifier: malformed, not an identification.
    mock.feed_frame(&identification_payload("", &[0, 120], false));

    let collected = settled_events(&mut events).await;
    assert!(matches!(collected.as_slice(), [DeviceEvent::UnknownPacket(_)]));
    assert!(connection.identity().is_none());
    assert_eq!(connection.status(), LinkStatus::Waiting);
}
