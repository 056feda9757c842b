//! Tests for the bridge lifecycle

use std::time::Duration;

use super::*;
use crate::bus::BusMessage;
use crate::keys::{KeyAction, RecordingKeySink};
use crate::sim::SimTransport;

use tokio::time::timeout;

const RIGHT_UP: u16 = 0x0001;
const RIGHT_STEER: u16 = 0x0008;

fn test_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.device.scan_timeout_ms = 100;
    config.device.reconnect_delay_ms = 20;
    config
}

fn start_bridge(
    config: BridgeConfig,
    sim: &SimTransport,
) -> (
    tokio::task::JoinHandle<ConnectionState>,
    BusReceiver,
    StopHandle,
    Arc<RecordingKeySink>,
) {
    let sink = Arc::new(RecordingKeySink::new());
    let (bridge, bus_rx, stop) = Bridge::new(config, Arc::new(sim.clone()), sink.clone());
    (tokio::spawn(bridge.run()), bus_rx, stop, sink)
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let result = timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {}", what);
}

async fn wait_for_status(bus: &mut BusReceiver, wanted: ConnectionState) {
    let result = timeout(Duration::from_secs(2), async {
        while let Some(message) = bus.recv().await {
            if let BusMessage::StatusChanged(state, _) = message {
                if state == wanted {
                    return;
                }
            }
        }
        panic!("bus closed before reaching {}", wanted);
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for status {}", wanted);
}

#[tokio::test]
async fn test_duplicate_frame_taps_exactly_once() {
    let sim = SimTransport::kickr();
    let (task, mut bus, stop, sink) = start_bridge(test_config(), &sim);

    wait_until("subscription", || sim.subscribed()).await;

    // Press, redelivered press, matching release
    let press = sim.press(RIGHT_UP);
    sim.send_raw(press);
    sim.release(RIGHT_UP);

    wait_until("tap delivery", || !sink.actions().is_empty()).await;
    assert_eq!(sink.actions(), vec![KeyAction::Tap("7".to_string())]);

    stop.request_stop();
    assert_eq!(task.await.unwrap(), ConnectionState::Stopped);

    // The duplicate produced a no-op note, nothing more
    let logs: Vec<String> = bus
        .drain()
        .into_iter()
        .filter_map(|m| match m {
            BusMessage::Log(line) => Some(line),
            _ => None,
        })
        .collect();
    assert_eq!(logs.iter().filter(|l| l.contains("Duplicate ignored")).count(), 1);
    assert_eq!(
        logs.iter().filter(|l| l.contains("Right Up press")).count(),
        1
    );
}

#[tokio::test]
async fn test_other_frames_are_diagnostic_only() {
    let sim = SimTransport::kickr();
    let (task, mut bus, stop, sink) = start_bridge(test_config(), &sim);

    wait_until("subscription", || sim.subscribed()).await;

    sim.send_raw(vec![0xDE, 0xAD, 0xBE, 0xEF]); // wrong length
    sim.send_raw(vec![0xBE, 0xEF, 0x81]); // unknown family
    sim.press(RIGHT_UP);

    wait_until("tap delivery", || !sink.actions().is_empty()).await;

    // The junk frames never reached the dispatcher
    assert_eq!(sink.actions(), vec![KeyAction::Tap("7".to_string())]);

    stop.request_stop();
    task.await.unwrap();

    let other_frames = bus
        .drain()
        .into_iter()
        .filter(|m| matches!(m, BusMessage::Log(line) if line.contains("Other frame")))
        .count();
    assert_eq!(other_frames, 2);
}

#[tokio::test]
async fn test_link_drop_releases_held_key_before_reconnecting() {
    let sim = SimTransport::kickr();
    let (task, mut bus, stop, sink) = start_bridge(test_config(), &sim);

    wait_until("subscription", || sim.subscribed()).await;
    wait_for_status(&mut bus, ConnectionState::Listening).await;

    sim.press(RIGHT_STEER);
    wait_until("key held", || {
        sink.actions().contains(&KeyAction::Down("ArrowRight".to_string()))
    })
    .await;

    sim.drop_link();

    // The held key must come up even though no release frame ever arrived
    wait_until("key released", || {
        sink.actions().contains(&KeyAction::Up("ArrowRight".to_string()))
    })
    .await;
    wait_for_status(&mut bus, ConnectionState::Reconnecting).await;

    // And the bridge resumes listening on its own
    wait_until("resubscription", || sim.subscribed()).await;
    wait_for_status(&mut bus, ConnectionState::Listening).await;

    stop.request_stop();
    assert_eq!(task.await.unwrap(), ConnectionState::Stopped);

    let downs = sink
        .actions()
        .iter()
        .filter(|a| matches!(a, KeyAction::Down(_)))
        .count();
    let ups = sink
        .actions()
        .iter()
        .filter(|a| matches!(a, KeyAction::Up(_)))
        .count();
    assert_eq!(downs, ups);
}

#[tokio::test]
async fn test_stop_while_reconnecting_schedules_no_more_attempts() {
    let mut config = test_config();
    config.device.reconnect_delay_ms = 60_000; // park the bridge in Reconnecting

    let sim = SimTransport::kickr();
    let (task, mut bus, stop, _sink) = start_bridge(config, &sim);

    wait_until("subscription", || sim.subscribed()).await;
    sim.drop_link();
    wait_for_status(&mut bus, ConnectionState::Reconnecting).await;

    let discovers = sim.discover_calls();
    let connects = sim.connect_calls();

    stop.request_stop();
    assert_eq!(task.await.unwrap(), ConnectionState::Stopped);

    // No further scan or connect was started after the stop request
    assert_eq!(sim.discover_calls(), discovers);
    assert_eq!(sim.connect_calls(), connects);
}

#[tokio::test]
async fn test_device_not_found_is_terminal_failure() {
    let sim = SimTransport::kickr();
    sim.set_present(false);

    let (task, mut bus, _stop, _sink) = start_bridge(test_config(), &sim);
    assert_eq!(task.await.unwrap(), ConnectionState::Failed);

    let messages = bus.drain();
    assert!(messages
        .iter()
        .any(|m| matches!(m, BusMessage::StatusChanged(ConnectionState::Failed, _))));
    // The host may offer a fresh start once the bridge is done
    assert!(messages.contains(&BusMessage::ControlEnabled(true)));
}

#[tokio::test]
async fn test_connect_failure_recovers_via_rescan() {
    let sim = SimTransport::kickr();
    sim.fail_next_connects(1);

    let (task, _bus, stop, _sink) = start_bridge(test_config(), &sim);

    wait_until("recovery", || sim.subscribed()).await;

    // First connect failed, handle was dropped, a rescan found it again
    assert_eq!(sim.connect_calls(), 2);
    assert_eq!(sim.discover_calls(), 2);

    stop.request_stop();
    assert_eq!(task.await.unwrap(), ConnectionState::Stopped);
}

#[tokio::test]
async fn test_subscribe_failure_treated_as_connect_failure() {
    let sim = SimTransport::kickr();
    sim.fail_next_subscribe();

    let (task, _bus, stop, _sink) = start_bridge(test_config(), &sim);

    wait_until("recovery", || sim.subscribed()).await;
    assert_eq!(sim.connect_calls(), 2);

    stop.request_stop();
    assert_eq!(task.await.unwrap(), ConnectionState::Stopped);
}

#[tokio::test]
async fn test_stop_request_drains_to_stopped_and_is_idempotent() {
    let sim = SimTransport::kickr();
    let (task, _bus, stop, _sink) = start_bridge(test_config(), &sim);

    stop.request_stop();
    assert_eq!(task.await.unwrap(), ConnectionState::Stopped);

    // request_stop is idempotent
    stop.request_stop();
    assert!(stop.is_requested());
}

#[tokio::test]
async fn test_dedup_survives_within_a_connection_but_replay_after_drop_is_suppressed() {
    let sim = SimTransport::kickr();
    let (task, _bus, stop, sink) = start_bridge(test_config(), &sim);

    wait_until("subscription", || sim.subscribed()).await;
    let press = sim.press(RIGHT_UP);
    wait_until("first tap", || sink.actions().len() == 1).await;

    sim.drop_link();
    wait_until("resubscription", || sim.subscribed()).await;

    // Subscription replay of the same press after reconnect: same sequence,
    // same kind, still suppressed by the tracker.
    sim.send_raw(press);
    sim.press(RIGHT_UP);
    wait_until("second tap", || sink.actions().len() == 2).await;

    assert_eq!(
        sink.actions(),
        vec![
            KeyAction::Tap("7".to_string()),
            KeyAction::Tap("7".to_string()),
        ]
    );

    stop.request_stop();
    assert_eq!(task.await.unwrap(), ConnectionState::Stopped);
}
