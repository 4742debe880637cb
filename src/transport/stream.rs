//! Transport over an arbitrary async byte stream.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{DynSerial, Transport, TransportError, DEFAULT_READ_TIMEOUT};

/// [`Transport`] backed by boxed `AsyncRead + AsyncWrite` streams.
///
/// Each `connect` takes the next queued stream, which lets tests model a device that
/// drops off the bus and comes back as a fresh link.
pub struct StreamTransport {
    active: Option<DynSerial>,
    queued: VecDeque<DynSerial>,
    read_timeout: Duration,
}

impl StreamTransport {
    /// Transport that will connect to `stream`.
    pub fn new(stream: DynSerial) -> Self {
        Self::with_streams([stream])
    }

    /// Transport that hands out one stream per successful `connect`.
    pub fn with_streams(streams: impl IntoIterator<Item = DynSerial>) -> Self {
        Self {
            active: None,
            queued: streams.into_iter().collect(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Override the per-read timeout.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn connect(&mut self, port: &str) -> Result<(), TransportError> {
        if self.active.is_some() {
            return Ok(());
        }
        match self.queued.pop_front() {
            Some(stream) => {
                self.active = Some(stream);
                Ok(())
            }
            None => Err(TransportError::ConnectionFailed {
                port: port.to_string(),
                reason: "no stream available".to_string(),
            }),
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.active.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(error = %e, "stream shutdown failed");
            }
        }
        Ok(())
    }

    async fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        let stream = self.active.as_mut().ok_or(TransportError::NotConnected)?;
        let mut buf = vec![0u8; max.max(1)];

        let result = tokio::time::timeout(self.read_timeout, stream.read(&mut buf)).await;
        match result {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(0)) => {
                self.active = None;
                Err(TransportError::Closed)
            }
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.active.as_mut().ok_or(TransportError::NotConnected)?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.active.is_some()
    }

    fn bytes_available(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_what_the_device_writes() {
        let (mut device, host) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(Box::new(host));
        transport.connect("duplex").await.unwrap();
        assert!(transport.is_open());

        device.write_all(b"Z\r").await.unwrap();
        let bytes = transport.read(16).await.unwrap();
        assert_eq!(bytes, b"Z\r");
    }

    #[tokio::test]
    async fn read_times_out_with_empty_buffer() {
        let (_device, host) = tokio::io::duplex(64);
        let mut transport =
            StreamTransport::new(Box::new(host)).with_read_timeout(Duration::from_millis(10));
        transport.connect("duplex").await.unwrap();

        let bytes = transport.read(16).await.unwrap();
        assert!(bytes.is_empty());
        assert!(transport.is_open());
    }

    #[tokio::test]
    async fn peer_close_marks_transport_closed() {
        let (device, host) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(Box::new(host));
        transport.connect("duplex").await.unwrap();
        drop(device);

        assert!(matches!(transport.read(16).await, Err(TransportError::Closed)));
        assert!(!transport.is_open());
        assert!(matches!(
            transport.read(16).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn writes_reach_the_device() {
        let (mut device, host) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(Box::new(host));
        transport.connect("duplex").await.unwrap();
        transport.write(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn reconnect_takes_next_stream() {
        let (_d1, h1) = tokio::io::duplex(8);
        let (_d2, h2) = tokio::io::duplex(8);
        let mut transport = StreamTransport::with_streams([
            Box::new(h1) as DynSerial,
            Box::new(h2) as DynSerial,
        ]);
        transport.connect("a").await.unwrap();
        transport.disconnect().await.unwrap();
        assert!(!transport.is_open());
        transport.connect("a").await.unwrap();
        transport.disconnect().await.unwrap();
        assert!(transport.connect("a").await.is_err());
    }

    #[tokio::test]
    async fn io_errors_surface_without_closing() {
        let mock = tokio_test::io::Builder::new()
            .read(b"W,+5")
            .read_error(std::io::Error::new(std::io::ErrorKind::Other, "framing error"))
            .read(b"4\r")
            .build();
        let mut transport = StreamTransport::new(Box::new(mock));
        transport.connect("mock").await.unwrap();

        assert_eq!(transport.read(16).await.unwrap(), b"W,+5");
        assert!(matches!(transport.read(16).await, Err(TransportError::Io(_))));
        assert!(transport.is_open());
        assert_eq!(transport.read(16).await.unwrap(), b"4\r");
    }
}
