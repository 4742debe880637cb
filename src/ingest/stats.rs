//! Diagnostics counters for the ingestion path.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters updated by the read loop.
#[derive(Debug, Default)]
pub struct IngestStats {
    bytes: AtomicU64,
    frames: AtomicU64,
    readings: AtomicU64,
    parse_errors: AtomicU64,
    unknown_frames: AtomicU64,
    transport_errors: AtomicU64,
    loop_restarts: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    /// Bytes received.
    pub bytes: u64,
    /// Frames split from the stream.
    pub frames: u64,
    /// Readings dispatched.
    pub readings: u64,
    /// Readings carrying at least one decode error.
    pub parse_errors: u64,
    /// Readings of unknown kind.
    pub unknown_frames: u64,
    /// Transport failures.
    pub transport_errors: u64,
    /// Read loops started by the liveness check.
    pub loop_restarts: u64,
}

impl IngestStats {
    pub(crate) fn add_bytes(&self, n: usize) {
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reading(&self) {
        self.readings.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unknown_frame(&self) {
        self.unknown_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn loop_restart(&self) {
        self.loop_restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            bytes: self.bytes.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            readings: self.readings.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            unknown_frames: self.unknown_frames.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            loop_restarts: self.loop_restarts.load(Ordering::Relaxed),
        }
    }
}
