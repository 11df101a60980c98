//! In-memory transport.
//!
//! Stands in for a serial link in tests and host-side simulations. The
//! [`MemoryHandle`] plays the device: it injects inbound bytes, inspects
//! what the driver wrote, scripts replies, and can pull the plug.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use tokio::sync::Notify;

use crate::error::{DriverError, FrameError, Result, TransportError};
use crate::protocol::{Direction, FrameCheck, FrameDecoder, Packet, encode_frame};
use crate::transport::Transport;

type Responder = Box<dyn FnMut(&Packet) -> Vec<Packet> + Send>;

struct Device {
    decoder: FrameDecoder,
    check: FrameCheck,
    respond: Responder,
}

#[derive(Default)]
struct Shared {
    inbound: BytesMut,
    written: Vec<Bytes>,
    disconnected: bool,
    device: Option<Device>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Driver side of an in-memory link.
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
    notify: Arc<Notify>,
    open: bool,
}

/// Device side of an in-memory link.
#[derive(Clone)]
pub struct MemoryHandle {
    shared: Arc<Mutex<Shared>>,
    notify: Arc<Notify>,
}

impl MemoryTransport {
    /// Creates a closed link and the handle controlling it.
    #[must_use]
    pub fn new() -> (Self, MemoryHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let notify = Arc::new(Notify::new());
        let handle = MemoryHandle {
            shared: Arc::clone(&shared),
            notify: Arc::clone(&notify),
        };
        (
            Self {
                shared,
                notify,
                open: false,
            },
            handle,
        )
    }
}

impl MemoryHandle {
    /// Queues bytes for the driver to read.
    pub fn push_inbound(&self, data: &[u8]) {
        lock(&self.shared).inbound.extend_from_slice(data);
        self.notify.notify_one();
    }

    /// Encodes packets and queues them for the driver to read.
    pub fn push_packets(
        &self,
        packets: &[Packet],
        check: FrameCheck,
    ) -> std::result::Result<(), FrameError> {
        for packet in packets {
            self.push_inbound(&encode_frame(packet, check)?);
        }
        Ok(())
    }

    /// Returns every frame written so far.
    #[must_use]
    pub fn written(&self) -> Vec<Bytes> {
        lock(&self.shared).written.clone()
    }

    /// Returns and forgets every frame written so far.
    pub fn take_written(&self) -> Vec<Bytes> {
        std::mem::take(&mut lock(&self.shared).written)
    }

    /// Decodes every frame written so far into packets.
    #[must_use]
    pub fn written_packets(&self, check: FrameCheck) -> Vec<Packet> {
        let mut decoder = FrameDecoder::new()
            .with_direction(Direction::Outbound)
            .with_check(check);
        for frame in self.written() {
            decoder.feed(&frame);
        }
        decoder.packets().collect()
    }

    /// Simulates the device going away.
    pub fn disconnect(&self) {
        lock(&self.shared).disconnected = true;
        self.notify.notify_one();
    }

    /// Installs a scripted device.
    ///
    /// Each packet the driver writes is decoded and handed to `respond`;
    /// the packets it returns are encoded and queued as inbound data.
    pub fn set_responder<F>(&self, check: FrameCheck, respond: F)
    where
        F: FnMut(&Packet) -> Vec<Packet> + Send + 'static,
    {
        lock(&self.shared).device = Some(Device {
            decoder: FrameDecoder::new()
                .with_direction(Direction::Outbound)
                .with_check(check),
            check,
            respond: Box::new(respond),
        });
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if lock(&self.shared).disconnected {
                return Err(TransportError::Disconnected.into());
            }
            self.open = true;
            Ok(())
        })
    }

    fn wait_for_data(&mut self, timeout: Duration) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            if !self.open {
                return Err(TransportError::Disconnected.into());
            }
            for attempt in 0..2 {
                {
                    let shared = lock(&self.shared);
                    if shared.disconnected {
                        drop(shared);
                        self.open = false;
                        return Err(TransportError::Disconnected.into());
                    }
                    if !shared.inbound.is_empty() {
                        return Ok(true);
                    }
                }
                if attempt == 0
                    && tokio::time::timeout(timeout, self.notify.notified())
                        .await
                        .is_err()
                {
                    return Ok(false);
                }
            }
            Ok(false)
        })
    }

    fn read_available(&mut self) -> Bytes {
        lock(&self.shared).inbound.split().freeze()
    }

    fn write(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.open {
                return Err(DriverError::NotConnected);
            }
            let mut shared = lock(&self.shared);
            if shared.disconnected {
                drop(shared);
                self.open = false;
                return Err(TransportError::Disconnected.into());
            }
            shared.written.push(data.clone());

            let mut replies = BytesMut::new();
            if let Some(device) = shared.device.as_mut() {
                device.decoder.feed(&data);
                let requests: Vec<Packet> = device.decoder.packets().collect();
                for request in &requests {
                    for reply in (device.respond)(request) {
                        match encode_frame(&reply, device.check) {
                            Ok(frame) => replies.extend_from_slice(&frame),
                            Err(e) => tracing::warn!("dropping scripted reply: {}", e),
                        }
                    }
                }
            }
            if !replies.is_empty() {
                shared.inbound.extend_from_slice(&replies);
                drop(shared);
                self.notify.notify_one();
            }
            Ok(())
        })
    }

    fn close(&mut self) {
        self.open = false;
        let mut shared = lock(&self.shared);
        shared.inbound.clear();
        if let Some(device) = shared.device.as_mut() {
            device.decoder.clear();
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
