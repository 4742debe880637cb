//! Connection lifecycle and the read-decode-dispatch loop.
//!
//! The [`IngestionController`] owns one transport and at most one read task. Every
//! decoded [`Reading`] is handed synchronously to the registered [`ReadingSink`]s in
//! frame arrival order, then broadcast as an [`IngestEvent`]. Transport failures and
//! state transitions are broadcast on the same channel.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::Reading;
use crate::transport::TransportError;

pub mod controller;
pub mod stats;

pub use controller::IngestionController;
pub use stats::{IngestStats, IngestStatsSnapshot};

/// Logical connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Session open, device present.
    Connected,
    /// Session open, device not currently enumerated or link lost.
    LinkAbsent,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::LinkAbsent => "link absent",
        };
        f.write_str(label)
    }
}

/// Notification broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    /// A decoded frame.
    Reading(Arc<Reading>),
    /// A transport read, write or reopen failed.
    TransportError(Arc<TransportError>),
    /// The connection state changed.
    StateChanged(ConnectionState),
}

/// Synchronous consumer on the dispatch path.
///
/// Sinks run to completion before the next frame is decoded, so each sink sees
/// readings strictly in arrival order. They must not block.
pub trait ReadingSink: Send {
    /// Handle one reading.
    fn on_reading(&mut self, reading: &Reading);
}

impl<S: ReadingSink> ReadingSink for Arc<parking_lot::Mutex<S>> {
    fn on_reading(&mut self, reading: &Reading) {
        self.lock().on_reading(reading);
    }
}

impl<S: ReadingSink + Sync> ReadingSink for Arc<parking_lot::RwLock<S>> {
    fn on_reading(&mut self, reading: &Reading) {
        self.write().on_reading(reading);
    }
}

/// Timing and sizing of the ingestion tasks.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Maximum bytes requested per read.
    pub read_chunk: usize,
    /// Pause after a failed read before retrying.
    pub retry_delay: Duration,
    /// Period of the device presence check.
    pub liveness_interval: Duration,
    /// Longest wait for the read task during disconnect.
    pub shutdown_timeout: Duration,
    /// Broadcast channel capacity.
    pub event_capacity: usize,
    /// Frames longer than this are force-split.
    pub max_frame_len: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            read_chunk: 1024,
            retry_delay: Duration::from_millis(500),
            liveness_interval: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(2),
            event_capacity: 1024,
            max_frame_len: crate::protocol::frame::DEFAULT_MAX_FRAME_LEN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RecordKind;
    use chrono::Utc;

    #[derive(Default)]
    struct Counter(usize);

    impl ReadingSink for Counter {
        fn on_reading(&mut self, _reading: &Reading) {
            self.0 += 1;
        }
    }

    #[test]
    fn shared_sinks_forward_to_inner() {
        let reading = Reading::new(RecordKind::EndOfDump, "Z", Utc::now());

        let mutex = Arc::new(parking_lot::Mutex::new(Counter::default()));
        let mut sink = Arc::clone(&mutex);
        sink.on_reading(&reading);
        assert_eq!(mutex.lock().0, 1);

        let rwlock = Arc::new(parking_lot::RwLock::new(Counter::default()));
        let mut sink = Arc::clone(&rwlock);
        sink.on_reading(&reading);
        sink.on_reading(&reading);
        assert_eq!(rwlock.read().0, 2);
    }

    #[test]
    fn state_labels() {
        assert_eq!(ConnectionState::LinkAbsent.to_string(), "link absent");
    }
}
