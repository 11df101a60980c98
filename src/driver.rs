//! Host-facing [`DeviceDriver`].
//!
//! The driver owns the transport, the frame decoder and, once connected,
//! the session: the frozen module registry and the input decoder state.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{DriverError, Result};
use crate::input::InputDecoder;
use crate::protocol::{FrameCheck, FrameDecoder, FrameStats, Packet, PacketKind, encode_frame};
use crate::registry::{EnumerationConfig, ModuleRegistry, enumerate};
use crate::router::route;
use crate::transport::{SerialConfig, SerialTransport, Transport};
use crate::types::{GestureEvent, Module, ModuleAddress};

/// Default bound on a single [`DeviceDriver::poll`] wait.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(20);

/// Driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Upper bound on how long `poll` waits for input.
    pub poll_timeout: Duration,
    /// Enumeration timing.
    pub enumeration: EnumerationConfig,
    /// Trailing check byte used on the link.
    pub frame_check: FrameCheck,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            enumeration: EnumerationConfig::default(),
            frame_check: FrameCheck::None,
        }
    }
}

impl DriverConfig {
    /// Sets the poll timeout.
    #[must_use]
    pub const fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the enumeration timing.
    #[must_use]
    pub const fn enumeration(mut self, enumeration: EnumerationConfig) -> Self {
        self.enumeration = enumeration;
        self
    }

    /// Sets the frame check.
    #[must_use]
    pub const fn frame_check(mut self, check: FrameCheck) -> Self {
        self.frame_check = check;
        self
    }
}

/// What the host learns on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Logical display length: the sum of all module cell counts.
    pub total_cells: usize,
    /// Number of logical keys across all modules.
    pub total_keys: usize,
    /// Modules in registry order.
    pub modules: Vec<Module>,
}

impl DeviceInfo {
    fn from_registry(registry: &ModuleRegistry) -> Self {
        Self {
            total_cells: registry.total_cells(),
            total_keys: registry.total_keys(),
            modules: registry.modules().to_vec(),
        }
    }
}

struct Session {
    registry: ModuleRegistry,
    input: InputDecoder,
}

/// Driver for one VarioPro display.
pub struct DeviceDriver<T: Transport = SerialTransport> {
    transport: T,
    config: DriverConfig,
    decoder: FrameDecoder,
    session: Option<Session>,
}

impl DeviceDriver<SerialTransport> {
    /// Creates a driver for a serial port.
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/ttyUSB0")
    ///
    /// # Returns
    ///
    /// A new driver (not yet connected).
    #[must_use]
    pub fn serial(port: impl Into<String>) -> Self {
        Self::with_serial_config(SerialConfig::new(port))
    }

    /// Creates a driver with custom serial configuration.
    #[must_use]
    pub fn with_serial_config(config: SerialConfig) -> Self {
        Self::with_transport(SerialTransport::new(config), DriverConfig::default())
    }
}

impl<T: Transport> DeviceDriver<T> {
    /// Creates a driver over any transport.
    #[must_use]
    pub fn with_transport(transport: T, config: DriverConfig) -> Self {
        Self {
            transport,
            config,
            decoder: FrameDecoder::new().with_check(config.frame_check),
            session: None,
        }
    }

    /// Opens the link and enumerates the attached modules.
    ///
    /// On failure the transport is closed again.
    pub async fn connect(&mut self) -> Result<DeviceInfo> {
        if self.session.is_some() {
            self.disconnect();
        }

        self.transport.open().await?;
        self.decoder.clear();

        let registry = match enumerate(
            &mut self.transport,
            &mut self.decoder,
            self.config.frame_check,
            &self.config.enumeration,
        )
        .await
        {
            Ok(registry) => registry,
            Err(e) => {
                tracing::warn!("enumeration failed: {}", e);
                self.transport.close();
                return Err(e);
            }
        };

        let info = DeviceInfo::from_registry(&registry);
        tracing::info!(
            "connected: {} modules, {} cells, {} keys",
            info.modules.len(),
            info.total_cells,
            info.total_keys
        );
        self.session = Some(Session {
            input: InputDecoder::new(&registry),
            registry,
        });
        Ok(info)
    }

    /// Waits up to the poll timeout for input and decodes it.
    ///
    /// Returns an empty list when nothing arrived. A lost link ends the
    /// session and is returned as an error.
    pub async fn poll(&mut self) -> Result<Vec<GestureEvent>> {
        if self.session.is_none() {
            return Err(DriverError::NotConnected);
        }

        let ready = self.transport.wait_for_data(self.config.poll_timeout).await;
        match ready {
            Ok(false) => return Ok(Vec::new()),
            Ok(true) => {}
            Err(e) => return Err(self.fail(e)),
        }

        self.decoder.feed(&self.transport.read_available());
        let packets: Vec<Packet> = self.decoder.packets().collect();
        let now = Instant::now();

        let mut events = Vec::new();
        for packet in packets {
            match packet.kind {
                PacketKind::InputReport => {
                    if let Some(session) = self.session.as_mut() {
                        events.extend(session.input.decode(&packet, now));
                    }
                }
                PacketKind::HandshakeAck => {
                    if let Err(e) = self.send(&Packet::ack(packet.address)).await {
                        return Err(self.fail(e));
                    }
                    self.announce(packet.address);
                }
                PacketKind::Removal => {
                    tracing::warn!("module {} removed", packet.address);
                }
                PacketKind::Rejected => {
                    tracing::warn!("device rejected module {}", packet.address);
                }
                kind => {
                    tracing::trace!("ignoring {} while connected", kind.name());
                }
            }
        }
        Ok(events)
    }

    /// Writes a full logical cell buffer to the display.
    ///
    /// The buffer must be exactly as long as the reported display. Nothing
    /// is written when it is not.
    pub async fn display(&mut self, buffer: &[u8]) -> Result<()> {
        let session = self.session.as_ref().ok_or(DriverError::NotConnected)?;
        let frames = route(buffer, &session.registry)?
            .iter()
            .map(|write| encode_frame(&write.to_packet(), self.config.frame_check))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for frame in frames {
            if let Err(e) = self.transport.write(frame).await {
                return Err(self.fail(e));
            }
        }
        Ok(())
    }

    /// Closes the link and drops the session.
    pub fn disconnect(&mut self) {
        if self.session.take().is_some() {
            tracing::info!("disconnecting");
        }
        self.transport.close();
        self.decoder.clear();
    }

    /// Returns the registry of the current session.
    #[must_use]
    pub fn registry(&self) -> Option<&ModuleRegistry> {
        self.session.as_ref().map(|s| &s.registry)
    }

    /// Returns framing counters.
    #[must_use]
    pub const fn framing_stats(&self) -> FrameStats {
        self.decoder.stats()
    }

    /// Returns true while a session is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_some() && self.transport.is_open()
    }

    /// Maps a module-local cell index to its logical buffer index.
    #[must_use]
    pub fn logical_cell(&self, address: ModuleAddress, local: usize) -> Option<usize> {
        self.registry()?.logical_cell(address, local)
    }

    /// Returns the driver configuration.
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    async fn send(&mut self, packet: &Packet) -> Result<()> {
        let frame = encode_frame(packet, self.config.frame_check)?;
        self.transport.write(frame).await
    }

    fn announce(&self, address: ModuleAddress) {
        let known = self
            .registry()
            .is_some_and(|registry| registry.get(address).is_some());
        if known {
            tracing::debug!("module {} announced itself again", address);
        } else {
            tracing::info!(
                "module {} arrived after enumeration; reconnect to use it",
                address
            );
        }
    }

    fn fail(&mut self, err: DriverError) -> DriverError {
        if err.is_disconnect() {
            tracing::warn!("session lost: {}", err);
            self.disconnect();
        }
        err
    }
}

impl<T: Transport> Drop for DeviceDriver<T> {
    fn drop(&mut self) {
        self.transport.close();
    }
}
