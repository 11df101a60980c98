//! Frame encoding and decoding for the VarioPro protocol.
//!
//! The wire format uses BAUM escape framing:
//! ```text
//! ┌──────────┬───────────┬──────────┬─────────────────┬─────────┐
//! │  0x1b    │ info type │  length  │      body       │ [check] │
//! │  1 byte  │  1 byte   │  1 byte  │  length bytes   │ 1 byte  │
//! └──────────┴───────────┴──────────┴─────────────────┴─────────┘
//! ```
//!
//! Every `0x1b` after the info type is sent twice. A single `0x1b`
//! therefore always marks the start of a new frame, which is what lets
//! the decoder resynchronize after line noise. The check byte is only
//! present when [`FrameCheck::Xor`] is configured.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::packet::{
    Direction, InfoType, LONG_DETECTION_LEN, Packet, PacketKind, SHORT_DETECTION_LEN,
};
use crate::types::ModuleAddress;

/// Sync byte opening every frame.
pub const ESC: u8 = 0x1b;

/// Maximum frame body size.
pub const MAX_BODY_SIZE: usize = u8::MAX as usize;

/// Number of discarded frames kept for diagnostics.
const ERROR_HISTORY: usize = 16;

/// Integrity check appended to frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameCheck {
    /// No check byte. Validation relies on info type and length rules.
    #[default]
    None,
    /// XOR of info type, length and body.
    Xor,
}

/// Computes the XOR check over a frame's header and body.
#[must_use]
pub fn xor_check(info_type: u8, body: &[u8]) -> u8 {
    body.iter()
        .fold(info_type ^ body.len() as u8, |acc, &b| acc ^ b)
}

fn put_escaped(buf: &mut BytesMut, byte: u8) {
    buf.put_u8(byte);
    if byte == ESC {
        buf.put_u8(ESC);
    }
}

/// Encodes a packet into a wire frame.
///
/// # Errors
///
/// Returns a `FrameError` if the packet has no wire form or its body
/// exceeds [`MAX_BODY_SIZE`].
pub fn encode(packet: &Packet, check: FrameCheck) -> Result<Bytes, FrameError> {
    let info = packet
        .kind
        .info_type()
        .ok_or(FrameError::NotEncodable(packet.kind.name()))?;
    let body = packet.body()?;
    if body.len() > MAX_BODY_SIZE {
        return Err(FrameError::TooLarge {
            size: body.len(),
            max: MAX_BODY_SIZE,
        });
    }

    let info_type = u8::from(info);
    let mut buf = BytesMut::with_capacity(4 + body.len() * 2);
    buf.put_u8(ESC);
    buf.put_u8(info_type);
    put_escaped(&mut buf, body.len() as u8);
    for &b in &body {
        put_escaped(&mut buf, b);
    }
    if check == FrameCheck::Xor {
        put_escaped(&mut buf, xor_check(info_type, &body));
    }
    Ok(buf.freeze())
}

/// Decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeState {
    /// Dropping bytes until a sync byte.
    #[default]
    SeekingSync,
    /// Sync seen, reading info type and length.
    ReadingHeader,
    /// Accumulating the body.
    ReadingPayload,
    /// Body complete, waiting for the check byte.
    ValidatingChecksum,
}

/// Decoder counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Valid packets produced.
    pub packets: u64,
    /// Frames discarded as malformed.
    pub errors: u64,
    /// Bytes dropped while seeking a sync byte.
    pub skipped_bytes: u64,
}

impl FrameStats {
    /// Fraction of frames that were discarded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        let total = self.packets + self.errors;
        if total == 0 {
            0.0
        } else {
            self.errors as f64 / total as f64
        }
    }
}

enum Step {
    Continue,
    Frame,
    // Error; leave the current byte unconsumed.
    Retry(FrameError),
    // Error; the current byte was consumed.
    Fail(FrameError),
}

/// Frame decoder that handles partial data, escape doubling and resync.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    state: DecodeState,
    direction: Direction,
    check: FrameCheck,
    escape_pending: bool,
    info: Option<InfoType>,
    length: Option<usize>,
    body: BytesMut,
    raw: BytesMut,
    stats: FrameStats,
    errors: VecDeque<Packet>,
}

impl FrameDecoder {
    /// Creates a decoder for device-to-host traffic without check bytes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the direction of the traffic being decoded.
    #[must_use]
    pub const fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Sets the expected integrity check.
    #[must_use]
    pub const fn with_check(mut self, check: FrameCheck) -> Self {
        self.check = check;
        self
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete packet.
    ///
    /// Returns `Ok(Some(packet))` if a packet was decoded, `Ok(None)` if
    /// more data is needed, or an error if a frame was discarded. After an
    /// error the decoder is back to seeking a sync byte and the next call
    /// continues with the remaining data.
    pub fn decode(&mut self) -> Result<Option<Packet>, FrameError> {
        while let Some(&byte) = self.buffer.first() {
            match self.step(byte) {
                Step::Continue => self.buffer.advance(1),
                Step::Frame => {
                    self.buffer.advance(1);
                    return self.finish();
                }
                Step::Fail(err) => {
                    self.buffer.advance(1);
                    return Err(self.discard(err));
                }
                Step::Retry(err) => return Err(self.discard(err)),
            }
        }
        Ok(None)
    }

    /// Returns an iterator over the packets decodable from buffered data.
    ///
    /// Discarded frames are skipped. The iterator ends when more data is
    /// needed and can be created again after the next [`feed`](Self::feed).
    pub fn packets(&mut self) -> Packets<'_> {
        Packets { decoder: self }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> DecodeState {
        self.state
    }

    /// Returns the decoder counters.
    #[must_use]
    pub const fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Returns recently discarded frames as `Error` packets, oldest first.
    pub fn recent_errors(&self) -> impl Iterator<Item = &Packet> {
        self.errors.iter()
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears buffered data and any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.reset();
    }

    fn reset(&mut self) {
        self.state = DecodeState::SeekingSync;
        self.escape_pending = false;
        self.info = None;
        self.length = None;
        self.body.clear();
        self.raw.clear();
    }

    fn step(&mut self, byte: u8) -> Step {
        match self.state {
            DecodeState::SeekingSync => {
                if byte == ESC {
                    self.start_frame();
                } else {
                    self.stats.skipped_bytes += 1;
                }
                Step::Continue
            }
            DecodeState::ReadingHeader if self.info.is_none() => {
                self.raw.put_u8(byte);
                if byte == ESC {
                    // Doubled sync before the info type; keep waiting.
                    return Step::Continue;
                }
                match InfoType::from_byte(byte) {
                    Some(info) => {
                        self.info = Some(info);
                        Step::Continue
                    }
                    None => Step::Fail(FrameError::UnknownInfoType(byte)),
                }
            }
            _ => self.step_escaped(byte),
        }
    }

    fn step_escaped(&mut self, byte: u8) -> Step {
        if self.escape_pending {
            self.escape_pending = false;
            if byte != ESC {
                // Lone sync: a new frame began mid-frame.
                self.raw.truncate(self.raw.len().saturating_sub(1));
                let seen = self.raw.len();
                return Step::Retry(FrameError::Interrupted(seen));
            }
        } else if byte == ESC {
            self.escape_pending = true;
            self.raw.put_u8(byte);
            return Step::Continue;
        }

        self.raw.put_u8(byte);
        match self.state {
            DecodeState::ReadingHeader => self.read_length(byte),
            DecodeState::ReadingPayload => {
                self.body.put_u8(byte);
                if Some(self.body.len()) == self.length {
                    self.body_complete()
                } else {
                    Step::Continue
                }
            }
            DecodeState::ValidatingChecksum => {
                let info_type = self.info.map_or(0, u8::from);
                let expected = xor_check(info_type, &self.body);
                if byte == expected {
                    Step::Frame
                } else {
                    Step::Fail(FrameError::ChecksumMismatch {
                        expected,
                        actual: byte,
                    })
                }
            }
            DecodeState::SeekingSync => Step::Continue,
        }
    }

    fn read_length(&mut self, byte: u8) -> Step {
        let length = usize::from(byte);
        let valid = match (self.info, self.direction) {
            (Some(InfoType::DeviceDetection), Direction::Inbound) => length == LONG_DETECTION_LEN,
            (Some(InfoType::DeviceDetection), Direction::Outbound) => {
                length == SHORT_DETECTION_LEN
            }
            (Some(InfoType::DynamicDataBlock), _) => length > ModuleAddress::LEN,
            (None, _) => false,
        };
        if !valid {
            return Step::Fail(FrameError::BadLength {
                info_type: self.info.map_or(0, u8::from),
                length,
            });
        }
        self.length = Some(length);
        self.state = DecodeState::ReadingPayload;
        Step::Continue
    }

    fn body_complete(&mut self) -> Step {
        match self.check {
            FrameCheck::None => Step::Frame,
            FrameCheck::Xor => {
                self.state = DecodeState::ValidatingChecksum;
                Step::Continue
            }
        }
    }

    fn start_frame(&mut self) {
        self.reset();
        self.state = DecodeState::ReadingHeader;
        self.raw.put_u8(ESC);
    }

    fn finish(&mut self) -> Result<Option<Packet>, FrameError> {
        let body = self.body.split().freeze();
        let info = self.info;
        let result = match info {
            Some(info) => Packet::from_body(info, &body, self.direction),
            None => Err(FrameError::BadLength {
                info_type: 0,
                length: body.len(),
            }),
        };
        match result {
            Ok(packet) => {
                self.reset();
                self.stats.packets += 1;
                tracing::trace!(
                    "decoded {} from {}: {}",
                    packet.kind.name(),
                    packet.address,
                    hex::encode(&packet.payload)
                );
                Ok(Some(packet))
            }
            Err(err) => Err(self.discard(err)),
        }
    }

    fn discard(&mut self, err: FrameError) -> FrameError {
        let raw = self.raw.split().freeze();
        let address = ModuleAddress::from_slice(raw.get(3..).unwrap_or_default())
            .unwrap_or(ModuleAddress::BROADCAST);
        tracing::debug!("discarding frame ({}): {}", err, hex::encode(&raw));

        if self.errors.len() == ERROR_HISTORY {
            self.errors.pop_front();
        }
        self.errors
            .push_back(Packet::new(PacketKind::Error, address, raw));
        self.stats.errors += 1;

        let interrupted = matches!(err, FrameError::Interrupted(_));
        self.reset();
        if interrupted {
            // The sync byte that interrupted us opens the next frame.
            self.start_frame();
        }
        err
    }
}

/// Iterator over decodable packets. See [`FrameDecoder::packets`].
pub struct Packets<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Packets<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        loop {
            match self.decoder.decode() {
                Ok(packet) => return packet,
                Err(e) => {
                    tracing::warn!("frame decode error: {}", e);
                    // Continue processing - the decoder resyncs on its own
                }
            }
        }
    }
}
