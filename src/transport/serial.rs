//! Physical serial port transport.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialStream};

use super::{Transport, TransportError, DEFAULT_READ_TIMEOUT, EGM_BAUD_RATE};

/// Open a serial port asynchronously using spawn_blocking.
///
/// Opening can block on some platforms, so it runs off the async runtime. The
/// EGM-4 line settings are applied: 8 data bits, no parity, 2 stop bits, no flow
/// control.
///
/// # Errors
///
/// Returns [`TransportError::ConnectionFailed`] if the port cannot be opened.
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> Result<SerialStream, TransportError> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::Two)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TransportError::ConnectionFailed {
                port: port_path_owned.clone(),
                reason: e.to_string(),
            })
    })
    .await
    .map_err(|e| TransportError::ConnectionFailed {
        port: port_path.to_string(),
        reason: format!("spawn_blocking for serial port opening failed: {}", e),
    })?
}

/// [`Transport`] over a tokio-serial port.
pub struct SerialTransport {
    baud_rate: u32,
    read_timeout: Duration,
    stream: Option<SerialStream>,
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(EGM_BAUD_RATE, DEFAULT_READ_TIMEOUT)
    }
}

impl SerialTransport {
    /// Transport with explicit line speed and read timeout.
    pub fn new(baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            baud_rate,
            read_timeout,
            stream: None,
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&mut self, port: &str) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = open_serial_async(port, self.baud_rate).await?;
        // Stale bytes from before the port was opened would start mid-record.
        if let Err(e) = stream.clear(tokio_serial::ClearBuffer::Input) {
            tracing::debug!(port, error = %e, "could not clear serial input buffer");
        }
        tracing::info!(port, baud = self.baud_rate, "serial port opened");
        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(error = %e, "serial shutdown failed");
            }
        }
        Ok(())
    }

    async fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let mut buf = vec![0u8; max.max(1)];

        let result = tokio::time::timeout(self.read_timeout, stream.read(&mut buf)).await;
        match result {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(0)) => {
                self.stream = None;
                Err(TransportError::Closed)
            }
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Ok(Err(e)) => {
                // An unplugged adapter keeps failing; drop it so the port is reopened.
                self.stream = None;
                Err(e.into())
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn bytes_available(&self) -> usize {
        self.stream
            .as_ref()
            .and_then(|s| s.bytes_to_read().ok())
            .map(|n| n as usize)
            .unwrap_or(0)
    }
}
