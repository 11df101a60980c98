//! # variopro
//!
//! Protocol core for BAUM VarioPro modular braille displays.
//!
//! A VarioPro display is a main module (64 or 80 cells) plus optional
//! satellite modules (status, telephone, TASO) on one serial link. This
//! library enumerates the modules, presents their cells as one logical
//! display, and turns raw input reports into key and routing gestures.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - ESC-framed wire codec with escape doubling and resync on corruption
//! - One flat cell buffer routed across every display-capable module
//! - Key, chord, wheel, slider and routing gestures per module
//! - In-memory transport for tests and simulations
//!
//! ## Quick Start
//!
//! ```no_run
//! use variopro::DeviceDriver;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), variopro::DriverError> {
//!     let mut driver = DeviceDriver::serial("/dev/ttyUSB0");
//!     let info = driver.connect().await?;
//!     println!("{} cells across {} modules", info.total_cells, info.modules.len());
//!
//!     driver.display(&vec![0xFF; info.total_cells]).await?;
//!
//!     loop {
//!         for event in driver.poll().await? {
//!             println!("{:?} {}", event.kind, event.id());
//!         }
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Frames and packets
//! - [`types`] - Module addresses, module kinds, gestures
//! - [`transport`] - Serial and in-memory links
//! - [`registry`] - Module enumeration and cell offsets
//! - [`router`] - Splitting the logical buffer per module
//! - [`input`] - Input report decoding
//! - [`driver`] - High-level [`DeviceDriver`]

pub mod driver;
pub mod error;
pub mod input;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use driver::{DeviceDriver, DeviceInfo, DriverConfig};
pub use error::{DriverError, EnumerationError, FrameError, Result, RoutingError, TransportError};
pub use input::InputDecoder;
pub use protocol::{FrameCheck, FrameDecoder, FrameStats, Packet, PacketKind};
pub use registry::{EnumerationConfig, ModuleRegistry};
pub use router::{CellWrite, route};
pub use transport::{
    MemoryHandle, MemoryTransport, SerialConfig, SerialTransport, Transport,
    serial::{list_ports, variopro_ports},
};
pub use types::{GestureCode, GestureEvent, GestureKind, Key, Module, ModuleAddress, ModuleKind};
