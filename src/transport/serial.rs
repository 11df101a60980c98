//! Serial/USB transport implementation.
//!
//! VarioPro displays attach through an FTDI USB serial bridge.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};

use crate::error::{DriverError, Result, TransportError};
use crate::transport::Transport;

/// Default baud rate for VarioPro displays.
pub const DEFAULT_BAUD_RATE: u32 = 19_200;

/// Default bound on a single write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(200);

/// FTDI vendor id used by VarioPro displays.
pub const USB_VENDOR_ID: u16 = 0x0403;

/// USB product ids: VarioPro 80 and VarioPro 64.
pub const USB_PRODUCT_IDS: [u16; 2] = [0xFE76, 0xFE77];

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Upper bound on a single write before the link is considered lost.
    pub write_timeout: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the write timeout.
    #[must_use]
    pub const fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Serial transport for VarioPro communication.
pub struct SerialTransport {
    config: SerialConfig,
    stream: Option<SerialStream>,
    pending: BytesMut,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            stream: None,
            pending: BytesMut::new(),
        }
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn lost(&mut self, reason: &str) -> DriverError {
        tracing::warn!("serial link lost: {}", reason);
        self.close();
        TransportError::Disconnected.into()
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.stream.is_some() {
                return Ok(());
            }

            tracing::info!("opening serial port: {}", self.config.port);

            let stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .open_native_async()
                .map_err(TransportError::Serial)?;

            self.stream = Some(stream);
            self.pending.clear();

            tracing::info!("serial port open");
            Ok(())
        })
    }

    fn wait_for_data(&mut self, timeout: Duration) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            if !self.pending.is_empty() {
                return Ok(true);
            }
            let Some(stream) = self.stream.as_mut() else {
                return Err(TransportError::Disconnected.into());
            };

            let mut buf = [0u8; 256];
            let result = tokio::time::timeout(timeout, stream.read(&mut buf)).await;
            match result {
                Ok(Ok(0)) => Err(self.lost("serial port closed")),
                Ok(Ok(n)) => {
                    tracing::trace!("received {} bytes", n);
                    self.pending.extend_from_slice(&buf[..n]);
                    Ok(true)
                }
                Ok(Err(e)) => Err(self.lost(&e.to_string())),
                Err(_) => Ok(false),
            }
        })
    }

    fn read_available(&mut self) -> Bytes {
        self.pending.split().freeze()
    }

    fn write(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let write_timeout = self.config.write_timeout;
            let stream = self.stream.as_mut().ok_or(DriverError::NotConnected)?;

            tracing::trace!("sending frame: {}", hex::encode(&data));

            let write = async {
                stream.write_all(&data).await?;
                stream.flush().await
            };
            let result = tokio::time::timeout(write_timeout, write).await;
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(self.lost(&e.to_string())),
                Err(_) => Err(self.lost("write timed out")),
            }
        })
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!("closing serial port: {}", self.config.port);
        }
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(TransportError::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Lists serial ports whose USB ids match a VarioPro display.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn variopro_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(TransportError::Serial)?;
    Ok(ports
        .into_iter()
        .filter(|p| match &p.port_type {
            SerialPortType::UsbPort(usb) => is_variopro_usb_id(usb.vid, usb.pid),
            _ => false,
        })
        .map(|p| p.port_name)
        .collect())
}

/// Returns true if a USB vendor/product pair belongs to a VarioPro display.
#[must_use]
pub fn is_variopro_usb_id(vid: u16, pid: u16) -> bool {
    vid == USB_VENDOR_ID && USB_PRODUCT_IDS.contains(&pid)
}
