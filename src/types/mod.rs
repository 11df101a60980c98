//! Data types for VarioPro entities.
//!
//! - Module addresses, kinds and capabilities
//! - Logical keys and gesture events

pub mod gesture;
pub mod module;

pub use gesture::{GestureCode, GestureEvent, GestureKind, Key};
pub use module::{Capabilities, FAMILY_MARKER, Module, ModuleAddress, ModuleKind};
