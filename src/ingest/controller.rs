//! Ingestion controller: one transport, one read loop, one liveness check.
//!
//! # Tasks
//!
//! - **Read loop**: reads with a short timeout, feeds the frame splitter, decodes and
//!   dispatches every frame before issuing the next read. It checks the running flag
//!   on every iteration and stops when the transport reports closed.
//! - **Liveness**: every `liveness_interval` checks whether the device is still
//!   enumerated. It moves the state between `Connected` and `LinkAbsent` and restarts
//!   a stopped read loop (with a fresh splitter) once the device is back.
//!
//! Both tasks and the public operations serialize on the session lock, so a restart
//! never overlaps an active loop or a teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::stats::{IngestStats, IngestStatsSnapshot};
use super::{ConnectionState, IngestEvent, IngestSettings, ReadingSink};
use crate::error::{AppResult, DaqError};
use crate::protocol::{FrameSplitter, RawFrame, RecordDecoder, RecordKind};
use crate::transport::{PortEnumerator, Transport, TransportError};

type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// State shared between the controller handle and its tasks.
struct Shared {
    settings: IngestSettings,
    decoder: RecordDecoder,
    enumerator: Arc<dyn PortEnumerator>,
    running: AtomicBool,
    state: parking_lot::RwLock<ConnectionState>,
    events: broadcast::Sender<IngestEvent>,
    sinks: parking_lot::Mutex<Vec<Box<dyn ReadingSink>>>,
    stats: IngestStats,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            info!(from = %previous, to = %next, "connection state changed");
            let _ = self.events.send(IngestEvent::StateChanged(next));
        }
    }

    fn report_transport_error(&self, error: TransportError) {
        self.stats.transport_error();
        warn!(error = %error, "transport error");
        let _ = self.events.send(IngestEvent::TransportError(Arc::new(error)));
    }

    fn dispatch(&self, frame: &RawFrame) {
        self.stats.frame();
        let reading = self.decoder.decode(frame.as_str());

        if reading.has_error() {
            self.stats.parse_error();
        }
        if reading.kind == RecordKind::Unknown {
            self.stats.unknown_frame();
            debug!(raw = %reading.raw, "unrecognized frame");
        }

        for sink in self.sinks.lock().iter_mut() {
            sink.on_reading(&reading);
        }

        self.stats.reading();
        // Err only means nobody is subscribed.
        let _ = self.events.send(IngestEvent::Reading(Arc::new(reading)));
    }
}

/// Resources of the current logical session.
struct Session {
    transport: SharedTransport,
    port: Option<String>,
    read_task: Option<JoinHandle<()>>,
    liveness_task: Option<JoinHandle<()>>,
    liveness_shutdown: Option<oneshot::Sender<()>>,
}

/// Owns the instrument link and feeds decoded readings to subscribers.
pub struct IngestionController {
    shared: Arc<Shared>,
    session: Arc<Mutex<Session>>,
}

impl IngestionController {
    /// Controller over `transport`, using `enumerator` for the liveness check.
    pub fn new(
        transport: Box<dyn Transport>,
        enumerator: Arc<dyn PortEnumerator>,
        decoder: RecordDecoder,
        settings: IngestSettings,
    ) -> Self {
        let (events, _rx) = broadcast::channel(settings.event_capacity.max(1));
        let shared = Arc::new(Shared {
            settings,
            decoder,
            enumerator,
            running: AtomicBool::new(false),
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
            events,
            sinks: parking_lot::Mutex::new(Vec::new()),
            stats: IngestStats::default(),
        });
        let session = Arc::new(Mutex::new(Session {
            transport: Arc::new(Mutex::new(transport)),
            port: None,
            read_task: None,
            liveness_task: None,
            liveness_shutdown: None,
        }));
        Self { shared, session }
    }

    /// Register a synchronous consumer. Sinks run in registration order.
    pub fn add_sink(&self, sink: Box<dyn ReadingSink>) {
        self.shared.sinks.lock().push(sink);
    }

    /// Drop every registered sink, releasing whatever they hold.
    pub fn clear_sinks(&self) {
        self.shared.sinks.lock().clear();
    }

    /// Receive readings, transport errors and state changes.
    ///
    /// Slow receivers may observe `RecvError::Lagged`; ordering-sensitive consumers
    /// should be registered with [`add_sink`](Self::add_sink) instead.
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.shared.events.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// True between a successful `connect` and `disconnect`.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Diagnostics counters.
    pub fn stats(&self) -> IngestStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Port of the open session.
    pub async fn port(&self) -> Option<String> {
        self.session.lock().await.port.clone()
    }

    /// Open the transport and start the read and liveness tasks.
    ///
    /// # Errors
    ///
    /// [`DaqError::AlreadyConnected`] if a session is open, or the transport error if
    /// the port cannot be opened (state returns to `Disconnected`).
    pub async fn connect(&self, port: &str) -> AppResult<()> {
        let mut session = self.session.lock().await;
        if let Some(current) = &session.port {
            return Err(DaqError::AlreadyConnected(current.clone()));
        }

        self.shared.set_state(ConnectionState::Connecting);
        let opened = session.transport.lock().await.connect(port).await;
        if let Err(e) = opened {
            warn!(port, error = %e, "connect failed");
            self.shared.set_state(ConnectionState::Disconnected);
            return Err(e.into());
        }

        session.port = Some(port.to_string());
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connected);

        session.read_task = Some(spawn_read_loop(&self.shared, &session.transport));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let session_handle = Arc::clone(&self.session);
        session.liveness_task = Some(tokio::spawn(async move {
            liveness_loop(shared, session_handle, shutdown_rx).await;
        }));
        session.liveness_shutdown = Some(shutdown_tx);

        info!(port, "ingestion started");
        Ok(())
    }

    /// Write raw bytes to the instrument.
    ///
    /// Waits for the read loop to release the link, which is at most one read timeout.
    ///
    /// # Errors
    ///
    /// [`DaqError::SerialPortNotConnected`] outside a session, or the transport's
    /// write error.
    pub async fn send(&self, data: &[u8]) -> AppResult<()> {
        let session = self.session.lock().await;
        if session.port.is_none() {
            return Err(DaqError::SerialPortNotConnected);
        }
        let mut transport = session.transport.lock().await;
        if !transport.is_open() {
            return Err(DaqError::SerialPortNotConnected);
        }
        transport.write(data).await?;
        debug!(bytes = data.len(), "sent to instrument");
        Ok(())
    }

    /// Stop the tasks and close the transport.
    ///
    /// The running flag is cleared first; the read loop is given `shutdown_timeout`
    /// to finish and is aborted after that. Disconnecting an idle controller is a
    /// no-op apart from the state.
    pub async fn disconnect(&self) -> AppResult<()> {
        let mut session = self.session.lock().await;
        self.shared.running.store(false, Ordering::SeqCst);

        if let Some(tx) = session.liveness_shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = session.liveness_task.take() {
            task.abort();
        }
        if let Some(task) = session.read_task.take() {
            join_bounded(task, self.shared.settings.shutdown_timeout).await;
        }

        let closed = session.transport.lock().await.disconnect().await;
        if let Some(port) = session.port.take() {
            info!(port, "ingestion stopped");
        }
        self.shared.set_state(ConnectionState::Disconnected);
        closed.map_err(DaqError::from)
    }
}

impl Drop for IngestionController {
    fn drop(&mut self) {
        // Tasks observe the flag and exit on their own.
        self.shared.running.store(false, Ordering::SeqCst);
    }
}

async fn join_bounded(mut task: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(())) => debug!("read loop joined"),
        Ok(Err(e)) => warn!(error = %e, "read loop ended abnormally"),
        Err(_) => {
            warn!(?timeout, "read loop did not stop in time; aborting");
            task.abort();
        }
    }
}

fn spawn_read_loop(shared: &Arc<Shared>, transport: &SharedTransport) -> JoinHandle<()> {
    let shared = Arc::clone(shared);
    let transport = Arc::clone(transport);
    tokio::spawn(async move {
        read_loop(shared, transport).await;
    })
}

async fn read_loop(shared: Arc<Shared>, transport: SharedTransport) {
    let mut splitter = FrameSplitter::with_max_frame_len(shared.settings.max_frame_len);
    let chunk = shared.settings.read_chunk.max(1);

    while shared.running.load(Ordering::SeqCst) {
        let (result, still_open) = {
            let mut transport = transport.lock().await;
            if !transport.is_open() {
                break;
            }
            let result = transport.read(chunk).await;
            (result, transport.is_open())
        };

        match result {
            Ok(bytes) if bytes.is_empty() => {}
            Ok(bytes) => {
                shared.stats.add_bytes(bytes.len());
                for frame in splitter.feed(&bytes) {
                    shared.dispatch(&frame);
                }
            }
            Err(error) => {
                shared.report_transport_error(error);
                if !still_open {
                    break;
                }
                tokio::time::sleep(shared.settings.retry_delay).await;
            }
        }
    }

    if shared.running.load(Ordering::SeqCst) {
        warn!(
            discarded = splitter.pending_len(),
            "read loop stopped while session open"
        );
        shared.set_state(ConnectionState::LinkAbsent);
    } else {
        debug!("read loop stopped");
    }
}

async fn liveness_loop(
    shared: Arc<Shared>,
    session: Arc<Mutex<Session>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(shared.settings.liveness_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => {
                let Some(port) = session.lock().await.port.clone() else {
                    break;
                };
                // Enumeration blocks; keep it off the runtime and outside the session lock.
                let present = device_present(&shared, &port).await;

                let mut guard = session.lock().await;
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                if guard.port.as_deref() != Some(port.as_str()) {
                    continue;
                }
                check_link(&shared, &mut guard, &port, present).await;
            }
        }
    }
}

async fn device_present(shared: &Arc<Shared>, port: &str) -> bool {
    let enumerator = Arc::clone(&shared.enumerator);
    let name = port.to_string();
    match tokio::task::spawn_blocking(move || enumerator.is_present(&name)).await {
        Ok(present) => present,
        Err(e) => {
            warn!(port, error = %e, "presence check failed");
            false
        }
    }
}

async fn check_link(shared: &Arc<Shared>, session: &mut Session, port: &str, present: bool) {
    let loop_alive = session
        .read_task
        .as_ref()
        .is_some_and(|task| !task.is_finished());

    if !present {
        if shared.state() != ConnectionState::LinkAbsent {
            warn!(port, "device disconnected");
            shared.set_state(ConnectionState::LinkAbsent);
        }
        return;
    }

    if loop_alive {
        if shared.state() == ConnectionState::LinkAbsent {
            info!(port, "device reconnected");
            shared.set_state(ConnectionState::Connected);
        }
        return;
    }

    let reopened = {
        let mut transport = session.transport.lock().await;
        if transport.is_open() {
            Ok(())
        } else {
            transport.connect(port).await
        }
    };

    match reopened {
        Ok(()) => {
            shared.stats.loop_restart();
            info!(port, "device reconnected; restarting read loop");
            session.read_task = Some(spawn_read_loop(shared, &session.transport));
            shared.set_state(ConnectionState::Connected);
        }
        Err(e) => {
            shared.report_transport_error(e);
            shared.set_state(ConnectionState::LinkAbsent);
        }
    }
}
