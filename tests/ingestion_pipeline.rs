//! End-to-end ingestion over in-memory links.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use egm_daq::ingest::{ConnectionState, IngestEvent, IngestSettings, IngestionController};
use egm_daq::protocol::{Reading, RecordDecoder, RecordKind};
use egm_daq::store::{Channel, ChannelStore};
use egm_daq::transport::simulated::{format_src_record, SrcRecord};
use egm_daq::transport::{AlwaysPresent, DynSerial, PortEnumerator, StreamTransport};
use egm_daq::ReadingSink;
use tokio::io::AsyncWriteExt;

#[derive(Default)]
struct Recorder {
    raws: Vec<String>,
}

impl ReadingSink for Recorder {
    fn on_reading(&mut self, reading: &Reading) {
        self.raws.push(reading.raw.clone());
    }
}

/// Presence controlled by the test.
struct Switch(Arc<AtomicBool>);

impl PortEnumerator for Switch {
    fn is_present(&self, _port: &str) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Enumeration that takes as long as a slow USB bus scan.
struct SlowPorts;

impl PortEnumerator for SlowPorts {
    fn is_present(&self, _port: &str) -> bool {
        std::thread::sleep(Duration::from_millis(300));
        true
    }
}

fn settings() -> IngestSettings {
    IngestSettings {
        retry_delay: Duration::from_millis(10),
        liveness_interval: Duration::from_millis(30),
        shutdown_timeout: Duration::from_millis(500),
        ..IngestSettings::default()
    }
}

fn record(plot: u8, dt: u32) -> String {
    format_src_record(&SrcRecord {
        plot,
        record: dt + 1,
        co2: 400 + dt * 2,
        dc: dt * 2,
        dt,
        sr_hundredths: 12,
        atmp: 1001,
    })
}

async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

fn build(transport: StreamTransport, enumerator: Arc<dyn PortEnumerator>) -> IngestionController {
    IngestionController::new(
        Box::new(transport),
        enumerator,
        RecordDecoder::default(),
        settings(),
    )
}

#[tokio::test]
async fn readings_reach_sinks_in_arrival_order() {
    let (mut device, host) = tokio::io::duplex(4096);
    let controller = build(StreamTransport::new(Box::new(host)), Arc::new(AlwaysPresent));

    let recorder = Arc::new(parking_lot::Mutex::new(Recorder::default()));
    let store = ChannelStore::default().into_shared();
    controller.add_sink(Box::new(Arc::clone(&recorder)));
    controller.add_sink(Box::new(Arc::clone(&store)));
    controller.connect("duplex").await.unwrap();
    assert_eq!(controller.state(), ConnectionState::Connected);

    let mut expected = vec!["W,+54".to_string()];
    expected.extend((0..25).map(|dt| record(4, dt)));
    expected.push("Z".to_string());

    let mut bytes = Vec::new();
    for line in &expected {
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\r');
    }
    for chunk in bytes.chunks(7) {
        device.write_all(chunk).await.unwrap();
    }

    wait_for("all readings", || recorder.lock().raws.len() == expected.len()).await;
    controller.disconnect().await.unwrap();

    assert_eq!(recorder.lock().raws, expected);

    let store = store.read();
    assert_eq!(store.len(4, Channel::Co2), 25);
    assert_eq!(store.latest(4, Channel::Co2).map(|s| s.value), Some(448.0));
    assert_eq!(store.latest(4, Channel::DeltaTime).map(|s| s.elapsed_s), Some(24.0));

    let stats = controller.stats();
    assert_eq!(stats.frames, expected.len() as u64);
    assert_eq!(stats.bytes, bytes.len() as u64);
    assert_eq!(stats.parse_errors, 0);
}

#[tokio::test]
async fn subscribers_see_readings_and_state_changes() {
    let (mut device, host) = tokio::io::duplex(256);
    let controller = build(StreamTransport::new(Box::new(host)), Arc::new(AlwaysPresent));
    let mut events = controller.subscribe();

    controller.connect("duplex").await.unwrap();
    device.write_all(b"Z,+10\r").await.unwrap();

    let mut states = Vec::new();
    let reading = loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(IngestEvent::StateChanged(state))) => states.push(state),
            Ok(Ok(IngestEvent::Reading(reading))) => break reading,
            Ok(Ok(IngestEvent::TransportError(e))) => panic!("unexpected transport error: {e}"),
            other => panic!("no reading received: {other:?}"),
        }
    };
    assert_eq!(states, vec![ConnectionState::Connecting, ConnectionState::Connected]);
    assert_eq!(reading.kind, RecordKind::ZeroCheck);
    assert_eq!(reading.get_f64("zero_countdown"), Some(10.0));

    controller.disconnect().await.unwrap();
    assert_eq!(controller.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnect_is_prompt_while_idle() {
    let (_device, host) = tokio::io::duplex(64);
    let controller = build(StreamTransport::new(Box::new(host)), Arc::new(AlwaysPresent));
    controller.connect("duplex").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    controller.disconnect().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!controller.is_running());

    // A second disconnect is harmless.
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn link_loss_restarts_with_fresh_splitter() {
    let (mut first_device, first_host) = tokio::io::duplex(256);
    let (mut second_device, second_host) = tokio::io::duplex(256);
    let transport = StreamTransport::with_streams([
        Box::new(first_host) as DynSerial,
        Box::new(second_host) as DynSerial,
    ]);
    let controller = build(transport, Arc::new(AlwaysPresent));

    let recorder = Arc::new(parking_lot::Mutex::new(Recorder::default()));
    controller.add_sink(Box::new(Arc::clone(&recorder)));
    let mut events = controller.subscribe();
    controller.connect("duplex").await.unwrap();

    // A complete frame, then a partial one cut off by the link dropping.
    first_device.write_all(b"W,+40\rW,+4").await.unwrap();
    wait_for("first frame", || recorder.lock().raws.len() == 1).await;
    drop(first_device);

    let saw_link_absent = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(IngestEvent::StateChanged(ConnectionState::LinkAbsent)) =
                events.recv().await
            {
                break;
            }
        }
    })
    .await;
    assert!(saw_link_absent.is_ok(), "link loss was not reported");

    wait_for("read loop restart", || controller.stats().loop_restarts == 1).await;
    wait_for("connected again", || controller.state() == ConnectionState::Connected).await;

    second_device.write_all(b"5\rW,+45\r").await.unwrap();
    wait_for("frames after restart", || recorder.lock().raws.len() == 3).await;
    controller.disconnect().await.unwrap();

    // The stale "W,+4" tail is not glued onto the new link's bytes.
    assert_eq!(recorder.lock().raws, vec!["W,+40", "5", "W,+45"]);
    assert!(controller.stats().transport_errors >= 1);
}

#[tokio::test]
async fn liveness_follows_device_presence() {
    let present = Arc::new(AtomicBool::new(true));
    let (mut device, host) = tokio::io::duplex(256);
    let controller = build(
        StreamTransport::new(Box::new(host)),
        Arc::new(Switch(Arc::clone(&present))),
    );
    let recorder = Arc::new(parking_lot::Mutex::new(Recorder::default()));
    controller.add_sink(Box::new(Arc::clone(&recorder)));
    controller.connect("/dev/ttyUSB0").await.unwrap();

    present.store(false, Ordering::SeqCst);
    wait_for("link absent", || controller.state() == ConnectionState::LinkAbsent).await;

    present.store(true, Ordering::SeqCst);
    wait_for("connected", || controller.state() == ConnectionState::Connected).await;
    assert_eq!(controller.stats().loop_restarts, 0);

    // The first read loop kept running throughout.
    device.write_all(b"Z\r").await.unwrap();
    wait_for("reading", || recorder.lock().raws.len() == 1).await;

    controller.disconnect().await.unwrap();
    assert_eq!(controller.port().await, None);
}

#[tokio::test]
async fn absent_device_is_not_reopened() {
    let present = Arc::new(AtomicBool::new(true));
    let (first_device, first_host) = tokio::io::duplex(64);
    let (_second_device, second_host) = tokio::io::duplex(64);
    let transport = StreamTransport::with_streams([
        Box::new(first_host) as DynSerial,
        Box::new(second_host) as DynSerial,
    ]);
    let controller = build(transport, Arc::new(Switch(Arc::clone(&present))));
    controller.connect("/dev/ttyUSB0").await.unwrap();

    present.store(false, Ordering::SeqCst);
    drop(first_device);
    wait_for("link absent", || controller.state() == ConnectionState::LinkAbsent).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(controller.stats().loop_restarts, 0);
    assert_eq!(controller.state(), ConnectionState::LinkAbsent);

    present.store(true, Ordering::SeqCst);
    wait_for("restart", || controller.stats().loop_restarts == 1).await;
    assert_eq!(controller.state(), ConnectionState::Connected);
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn slow_enumeration_does_not_stall_the_runtime() {
    let (_device, host) = tokio::io::duplex(64);
    let controller = IngestionController::new(
        Box::new(StreamTransport::new(Box::new(host))),
        Arc::new(SlowPorts),
        RecordDecoder::default(),
        IngestSettings {
            liveness_interval: Duration::from_millis(20),
            ..settings()
        },
    );
    controller.connect("/dev/ttyUSB0").await.unwrap();

    let mut worst = Duration::ZERO;
    for _ in 0..40 {
        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        worst = worst.max(started.elapsed());
    }
    assert!(worst < Duration::from_millis(150), "timer delayed by {worst:?}");

    let started = std::time::Instant::now();
    controller.send(b"?").await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(250));

    let started = std::time::Instant::now();
    controller.disconnect().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(250));
}
