//! Byte transports to the instrument.
//!
//! The ingestion controller only sees the [`Transport`] trait, so the same pipeline
//! runs against a physical serial port, an in-memory stream in tests, or the
//! [`SimulatedTransport`] used for demos.
//!
//! # Implementations
//!
//! - [`SerialTransport`]: tokio-serial at the EGM-4 line settings (9600 8N2).
//!   Requires the `instrument_serial` feature.
//! - [`StreamTransport`]: any `AsyncRead + AsyncWrite` such as `tokio::io::duplex`.
//! - [`SimulatedTransport`]: generates soil respiration records with fragmentation.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod ports;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod simulated;
pub mod stream;

pub use ports::{list_ports, AlwaysPresent, PortEnumerator, PortInfo, SystemPorts};
#[cfg(feature = "instrument_serial")]
pub use serial::{open_serial_async, SerialTransport};
pub use simulated::{SimulatedTransport, SimulationConfig};
pub use stream::StreamTransport;

/// Line speed of the EGM-4 RS-232 port.
pub const EGM_BAUD_RATE: u32 = 9600;

/// Default timeout for a single read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

// =============================================================================
// Errors
// =============================================================================

/// Connection or I/O failure on the instrument link.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The port could not be opened.
    #[error("failed to open {port}: {reason}")]
    ConnectionFailed {
        /// Port name.
        port: String,
        /// Underlying reason.
        reason: String,
    },

    /// An operation needed an open transport.
    #[error("transport not connected")]
    NotConnected,

    /// The peer closed the link (end of stream).
    #[error("transport closed by peer")]
    Closed,

    /// Read or write failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial I/O requested in a build without serial support.
    #[error("serial support not enabled. Rebuild with --features instrument_serial")]
    FeatureDisabled,

    /// The host could not list its serial devices.
    #[error("port enumeration failed: {0}")]
    Enumeration(String),
}

// =============================================================================
// Transport Trait
// =============================================================================

/// Trait alias for async byte streams usable as an instrument link.
///
/// Covers `tokio_serial::SerialStream`, `tokio::io::DuplexStream` and mocks.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed byte stream.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Abstract link to the instrument.
///
/// `read` is short and bounded: it returns an empty buffer when nothing arrives
/// within the transport's read timeout so callers stay responsive to cancellation.
#[async_trait]
pub trait Transport: Send {
    /// Open the link to `port`.
    async fn connect(&mut self, port: &str) -> Result<(), TransportError>;

    /// Close the link. Closing an already closed transport is not an error.
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Read up to `max` bytes, waiting at most the read timeout.
    async fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError>;

    /// Write all of `data`.
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// True while the link is open.
    fn is_open(&self) -> bool;

    /// Bytes waiting in the receive buffer, when the transport can tell.
    fn bytes_available(&self) -> usize;
}
