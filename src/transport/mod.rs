//! Transport layer for VarioPro communication.
//!
//! The core never sleeps to wait for I/O. All waiting goes through
//! [`Transport::wait_for_data`], which returns within its bound so a host
//! event loop can interleave other work.

pub mod memory;
pub mod serial;

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::Result;

/// Trait for transport implementations.
pub trait Transport: Send {
    /// Opens the link.
    fn open(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Waits until bytes are available or `timeout` elapses.
    ///
    /// Returns `Ok(false)` on timeout. A lost link is reported as
    /// [`TransportError::Disconnected`](crate::error::TransportError::Disconnected).
    fn wait_for_data(&mut self, timeout: Duration) -> BoxFuture<'_, Result<bool>>;

    /// Returns bytes already received, without waiting.
    fn read_available(&mut self) -> Bytes;

    /// Writes raw bytes to the link.
    fn write(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Closes the link. Safe to call when already closed.
    fn close(&mut self);

    /// Returns true if the link is open.
    fn is_open(&self) -> bool;
}

pub use memory::{MemoryHandle, MemoryTransport};
pub use serial::{SerialConfig, SerialTransport};
