//! Protocol definitions for VarioPro communication.
//!
//! This module contains the low-level protocol types including:
//! - Frame encoding/decoding with escape doubling and resync
//! - Packet kinds and body layouts

pub mod frame;
pub mod packet;

pub use frame::{
    DecodeState, ESC, FrameCheck, FrameDecoder, FrameStats, MAX_BODY_SIZE, Packets,
    encode as encode_frame,
};
pub use packet::{Direction, InfoType, Packet, PacketKind};
