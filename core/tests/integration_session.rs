//! End-to-end session tests against a scripted in-memory link.
//!
//! The fake link records every outbound write and lets tests flip liveness
//! and inject write failures; inbound frames are pushed through the same
//! `FrameSink` a real transport would use.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use valvelink_core::{
    frame_channel, AuthToken, ClientError, ConnectionState, DeviceProfile, FrameSink, LinkError,
    LinkPort, SessionConfig, TelemetrySnapshot, ValveClient,
};

const TOKEN_HEX: &str = "C2D603F86EE649E3BFD8946821EEFF55";

/// In-memory link that records writes and simulates failure modes.
#[derive(Default)]
struct RecordingLink {
    writes: Mutex<Vec<Vec<u8>>>,
    up: AtomicBool,
    fail_writes: AtomicBool,
    closes: AtomicUsize,
}

impl RecordingLink {
    fn new() -> Arc<Self> {
        let link = Self::default();
        link.up.store(true, Ordering::SeqCst);
        Arc::new(link)
    }

    fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl LinkPort for RecordingLink {
    async fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LinkError::WriteFailed("simulated radio failure".to_string()));
        }
        self.writes.lock().push(bytes.to_vec());
        Ok(())
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.up.store(false, Ordering::SeqCst);
    }
}

/// Data fragment as the device frames it: header, payload, two trailer
/// bytes (never validated, deliberately garbage here).
fn fragment(header: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![header];
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&[0xDE, 0xAD]);
    frame
}

fn quick_config() -> SessionConfig {
    SessionConfig {
        auth_timeout: Duration::from_millis(200),
        frame_timeout: Duration::from_millis(200),
    }
}

struct Harness {
    client: ValveClient,
    sink: FrameSink,
    link: Arc<RecordingLink>,
    events: mpsc::UnboundedReceiver<TelemetrySnapshot>,
}

fn harness() -> Harness {
    let link = RecordingLink::new();
    let (sink, inbound) = frame_channel(64);
    let (events_tx, events) = mpsc::unbounded_channel();
    let client = ValveClient::new(
        DeviceProfile::softener(),
        AuthToken::parse(TOKEN_HEX).expect("token"),
        link.clone(),
        inbound,
        quick_config(),
    )
    .expect("client")
    .with_event_sink(move |snapshot| {
        let _ = events_tx.send(snapshot.clone());
    });
    Harness {
        client,
        sink,
        link,
        events,
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<TelemetrySnapshot>) -> TelemetrySnapshot {
    timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event within deadline")
        .expect("event channel open")
}

#[tokio::test]
async fn test_handshake_happy_path() {
    let mut h = harness();

    // Device acks the auth request immediately.
    h.sink.deliver(vec![0xCC]);
    h.client.connect().await.expect("handshake");

    assert_eq!(h.client.state(), ConnectionState::Connected);
    let writes = h.link.writes();
    assert_eq!(writes[0], vec![0xEA], "auth request first");
    assert_eq!(writes[1].len(), 16, "16-byte token follows the ack");
    assert_eq!(writes[1][0], 0xC2);
}

#[tokio::test]
async fn test_handshake_with_preauth_telemetry() {
    let mut h = harness();

    // The device pushes a complete telemetry message before acking.
    h.sink.deliver(fragment(0xC0, br#"{"dbl": 12000}"#));
    h.sink.deliver(vec![0xCC]);
    h.client.connect().await.expect("handshake");

    assert_eq!(h.client.state(), ConnectionState::Connected);
    assert_eq!(h.client.snapshot().battery_level_mv, Some(12000));

    let writes = h.link.writes();
    assert_eq!(writes[0], vec![0xEA]);
    assert_eq!(writes[1], vec![0xCC], "pre-auth fragment acked");
    assert_eq!(writes[2].len(), 16, "token still sent after the real ack");

    let event = next_event(&mut h.events).await;
    assert_eq!(event.battery_level_mv, Some(12000));
}

#[tokio::test]
async fn test_handshake_timeout() {
    let mut h = harness();

    let err = h.client.connect().await.expect_err("device stays silent");
    assert!(matches!(err, ClientError::AuthenticationTimeout));
    assert_ne!(h.client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_multi_fragment_reassembly() {
    let mut h = harness();
    h.sink.deliver(vec![0xCC]);
    h.client.connect().await.expect("handshake");

    // One JSON message split across three fragments; last bit only on the
    // final one.
    h.sink.deliver(fragment(0x80, br#"{"dtgr": 5"#));
    h.sink.deliver(fragment(0x00, br#"00, "dwh""#));
    h.sink.deliver(fragment(0x40, br#": 25}"#));

    let event = next_event(&mut h.events).await;
    assert_eq!(event.total_gallons_remaining, Some(5.0));
    assert_eq!(event.water_hardness, Some(25));

    // Every fragment was acked, in order, before the decode fired.
    let writes = h.link.writes();
    let acks = writes.iter().filter(|w| *w == &vec![0xCC]).count();
    assert_eq!(acks, 3, "exactly one ack per fragment");

    h.client.disconnect().await;
}

#[tokio::test]
async fn test_every_fragment_acked_even_when_undecodable() {
    let mut h = harness();
    h.sink.deliver(vec![0xCC]);
    h.client.connect().await.expect("handshake");

    h.sink.deliver(fragment(0xC0, b"this is not json"));
    // A valid message afterwards proves the session survived.
    h.sink.deliver(fragment(0xC0, br#"{"dm": 59}"#));

    let event = next_event(&mut h.events).await;
    assert_eq!(event.time_minutes, Some(59));
    assert!(event.raw.get("this").is_none());
    assert_eq!(h.client.state(), ConnectionState::Connected);

    let acks = h
        .link
        .writes()
        .iter()
        .filter(|w| *w == &vec![0xCC])
        .count();
    assert_eq!(acks, 2, "undecodable fragment still acked");

    h.client.disconnect().await;
}

#[tokio::test]
async fn test_keepalive_pong_and_no_state_mutation() {
    let mut h = harness();
    h.sink.deliver(vec![0xCC]);
    h.client.connect().await.expect("handshake");

    h.sink.deliver(vec![0xE0]);
    // Marker message so we know the probe was processed first.
    h.sink.deliver(fragment(0xC0, br#"{"dh": 7}"#));
    let event = next_event(&mut h.events).await;
    assert_eq!(event.time_hours, Some(7));

    let writes = h.link.writes();
    assert!(writes.contains(&vec![0xF0]), "pong sent");
    assert_eq!(
        event.raw.len(),
        1,
        "keep-alive left no trace in the snapshot"
    );

    h.client.disconnect().await;
}

#[tokio::test]
async fn test_malformed_frames_dropped_silently() {
    let mut h = harness();
    h.sink.deliver(vec![0xCC]);
    h.client.connect().await.expect("handshake");
    let writes_after_connect = h.link.writes().len();

    h.sink.deliver(vec![0x42]);
    h.sink.deliver(vec![0x01, 0x02]);
    h.sink.deliver(fragment(0xC0, br#"{"dh": 1}"#));
    next_event(&mut h.events).await;

    // Only the data fragment produced a write (its ack).
    assert_eq!(h.link.writes().len(), writes_after_connect + 1);

    h.client.disconnect().await;
}

#[tokio::test]
async fn test_merge_is_cumulative_across_messages() {
    let mut h = harness();
    h.sink.deliver(vec![0xCC]);
    h.client.connect().await.expect("handshake");

    h.sink.deliver(fragment(0xC0, br#"{"dbl": 12000}"#));
    next_event(&mut h.events).await;
    h.sink.deliver(fragment(0xC0, br#"{"dtgr": 500}"#));
    next_event(&mut h.events).await;
    h.sink.deliver(fragment(0xC0, b"{}"));
    let event = next_event(&mut h.events).await;

    assert_eq!(event.battery_level_mv, Some(12000));
    assert_eq!(event.total_gallons_remaining, Some(5.0));

    h.client.disconnect().await;
}

#[tokio::test]
async fn test_stale_buffer_dropped_on_first_fragment_bit() {
    let mut h = harness();
    h.sink.deliver(vec![0xCC]);
    h.client.connect().await.expect("handshake");

    // A message whose final fragment never arrives...
    h.sink.deliver(fragment(0x80, br#"{"dbl":"#));
    // ...followed by a fresh, complete message. The stale bytes must not
    // corrupt it.
    h.sink.deliver(fragment(0xC0, br#"{"dwh": 25}"#));

    let event = next_event(&mut h.events).await;
    assert_eq!(event.water_hardness, Some(25));
    assert!(event.raw.get("dbl").is_none(), "partial message discarded");

    h.client.disconnect().await;
}

#[tokio::test]
async fn test_write_failure_ends_session_with_connection_lost() {
    let mut h = harness();
    h.sink.deliver(vec![0xCC]);
    h.client.connect().await.expect("handshake");

    h.link.fail_writes.store(true, Ordering::SeqCst);
    // The keep-alive reply will fail to write.
    h.sink.deliver(vec![0xE0]);

    let err = h.client.closed().await.expect_err("session must fail");
    assert!(matches!(err, ClientError::ConnectionLost(_)));
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_idle_timeout_with_link_down_ends_session() {
    let mut h = harness();
    h.sink.deliver(vec![0xCC]);
    h.client.connect().await.expect("handshake");

    h.link.up.store(false, Ordering::SeqCst);

    let err = h.client.closed().await.expect_err("link is gone");
    assert!(matches!(err, ClientError::ConnectionLost(_)));
}

#[tokio::test]
async fn test_idle_timeout_with_link_up_keeps_session() {
    let mut h = harness();
    h.sink.deliver(vec![0xCC]);
    h.client.connect().await.expect("handshake");

    // Outlive several frame timeouts, then prove the loop is still alive.
    tokio::time::sleep(Duration::from_millis(700)).await;
    h.sink.deliver(fragment(0xC0, br#"{"dh": 3}"#));
    let event = next_event(&mut h.events).await;
    assert_eq!(event.time_hours, Some(3));

    h.client.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_closes_link() {
    let mut h = harness();
    h.sink.deliver(vec![0xCC]);
    h.client.connect().await.expect("handshake");

    h.client.disconnect().await;
    h.client.disconnect().await;

    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert!(h.link.closes.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_stop_discards_partial_buffer() {
    let mut h = harness();
    h.sink.deliver(vec![0xCC]);
    h.client.connect().await.expect("handshake");

    // Half a message in flight when the stop arrives.
    h.sink.deliver(fragment(0x80, br#"{"dbl": 12"#));
    // Let the fragment be consumed before stopping.
    h.sink.deliver(fragment(0xC0, br#"{"dm": 1}"#));
    next_event(&mut h.events).await;
    h.sink.deliver(fragment(0x80, br#"{"dwh": 9"#));
    h.client.disconnect().await;

    // No decode of the dangling fragment ever fired.
    assert!(timeout(Duration::from_millis(200), h.events.recv())
        .await
        .is_err());
    assert_eq!(h.client.snapshot().water_hardness, None);
}

#[tokio::test]
async fn test_reconnect_requires_fresh_client() {
    let mut h = harness();
    h.sink.deliver(vec![0xCC]);
    h.client.connect().await.expect("handshake");
    h.client.disconnect().await;

    let err = h.client.connect().await.expect_err("session consumed");
    assert!(matches!(err, ClientError::SessionConsumed));
}
