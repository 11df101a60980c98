//! Packet definitions for the VarioPro protocol.
//!
//! A frame carries an info type and a body. The info type says whether
//! the body is a device detection record or a dynamic data block; the
//! body layout and the direction of travel decide the [`PacketKind`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::types::ModuleAddress;

/// Info type byte following the sync byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InfoType {
    /// Module detection, arrival and removal.
    DeviceDetection = 0x50,
    /// Module-addressed data (cell writes, input reports).
    DynamicDataBlock = 0x51,
}

impl InfoType {
    /// Attempts to parse an info type from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x50 => Some(Self::DeviceDetection),
            0x51 => Some(Self::DynamicDataBlock),
            _ => None,
        }
    }
}

impl From<InfoType> for u8 {
    fn from(info: InfoType) -> Self {
        info as Self
    }
}

/// Detection status byte values.
pub mod status {
    /// Host acknowledges an arrival; device announces an arrival.
    pub const ARRIVAL: u8 = 0x01;
    /// Device announces a removal.
    pub const REMOVAL: u8 = 0x02;
    /// Device rejected a module (address conflict on the link).
    pub const REJECTED: u8 = 0x03;
    /// Host queries all modules.
    pub const QUERY: u8 = 0x04;
}

/// Data block command byte for a register write.
pub const CMD_WRITE: u8 = 0x00;

/// First dots register on a display module.
pub const FIRST_DOTS_REGISTER: u8 = 0x00;

/// Length of a host-originated detection body: address and status.
pub const SHORT_DETECTION_LEN: usize = ModuleAddress::LEN + 1;

/// Length of a device-originated detection body: address, serial, status.
pub const LONG_DETECTION_LEN: usize = ModuleAddress::LEN + 4 + 1;

/// Cell write header following the address: command, register, count.
const CELL_WRITE_HEADER_LEN: usize = 3;

/// Direction of travel of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Device to host.
    #[default]
    Inbound,
    /// Host to device.
    Outbound,
}

/// Packet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Host queries every module (broadcast).
    Handshake,
    /// A module announces its arrival. Payload is its 4-byte serial.
    HandshakeAck,
    /// Host writes cells to a module. Payload is the cells.
    CellWrite,
    /// A module reports input. Payload is the raw report.
    InputReport,
    /// Host acknowledges a module arrival.
    Ack,
    /// A discarded frame, kept for diagnostics only. Payload is the raw
    /// bytes received for it.
    Error,
    /// A module was unplugged. Payload is its serial.
    Removal,
    /// The device refused a module. Payload is its serial.
    Rejected,
}

impl PacketKind {
    /// Returns the info type the kind travels under.
    #[must_use]
    pub const fn info_type(self) -> Option<InfoType> {
        match self {
            Self::Handshake | Self::HandshakeAck | Self::Ack | Self::Removal | Self::Rejected => {
                Some(InfoType::DeviceDetection)
            }
            Self::CellWrite | Self::InputReport => Some(InfoType::DynamicDataBlock),
            Self::Error => None,
        }
    }

    /// Returns the direction the kind travels in.
    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            Self::Handshake | Self::CellWrite | Self::Ack => Direction::Outbound,
            Self::HandshakeAck
            | Self::InputReport
            | Self::Removal
            | Self::Rejected
            | Self::Error => Direction::Inbound,
        }
    }

    /// Returns the kind name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::HandshakeAck => "handshake-ack",
            Self::CellWrite => "cell-write",
            Self::InputReport => "input-report",
            Self::Ack => "ack",
            Self::Error => "error",
            Self::Removal => "removal",
            Self::Rejected => "rejected",
        }
    }
}

/// A validated protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet kind.
    pub kind: PacketKind,
    /// Target address for outbound packets, source address for inbound.
    pub address: ModuleAddress,
    /// Kind-specific payload.
    pub payload: Bytes,
}

impl Packet {
    /// Creates a packet.
    #[must_use]
    pub fn new(kind: PacketKind, address: ModuleAddress, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            address,
            payload: payload.into(),
        }
    }

    /// Global module query.
    #[must_use]
    pub const fn handshake() -> Self {
        Self {
            kind: PacketKind::Handshake,
            address: ModuleAddress::BROADCAST,
            payload: Bytes::new(),
        }
    }

    /// Acknowledgment of a module arrival.
    #[must_use]
    pub const fn ack(address: ModuleAddress) -> Self {
        Self {
            kind: PacketKind::Ack,
            address,
            payload: Bytes::new(),
        }
    }

    /// Cell write to one module.
    #[must_use]
    pub fn cell_write(address: ModuleAddress, cells: &[u8]) -> Self {
        Self::new(PacketKind::CellWrite, address, Bytes::copy_from_slice(cells))
    }

    /// Returns the serial number carried by detection packets.
    #[must_use]
    pub fn serial(&self) -> Option<[u8; 4]> {
        match self.kind {
            PacketKind::HandshakeAck | PacketKind::Removal | PacketKind::Rejected => {
                self.payload.get(..4)?.try_into().ok()
            }
            _ => None,
        }
    }

    /// Builds the frame body (everything between length and check).
    pub(crate) fn body(&self) -> Result<Bytes, FrameError> {
        let mut body = BytesMut::with_capacity(
            ModuleAddress::LEN + CELL_WRITE_HEADER_LEN + self.payload.len(),
        );
        body.put_slice(self.address.as_bytes());

        match self.kind {
            PacketKind::Handshake | PacketKind::Ack => {
                if !self.payload.is_empty() {
                    return Err(FrameError::UnexpectedBody {
                        info_type: InfoType::DeviceDetection.into(),
                        reason: "host detection packets carry no payload",
                    });
                }
                body.put_u8(if self.kind == PacketKind::Handshake {
                    status::QUERY
                } else {
                    status::ARRIVAL
                });
            }
            PacketKind::HandshakeAck | PacketKind::Removal | PacketKind::Rejected => {
                if self.payload.len() != 4 {
                    return Err(FrameError::UnexpectedBody {
                        info_type: InfoType::DeviceDetection.into(),
                        reason: "detection serial must be 4 bytes",
                    });
                }
                body.put_slice(&self.payload);
                body.put_u8(match self.kind {
                    PacketKind::HandshakeAck => status::ARRIVAL,
                    PacketKind::Removal => status::REMOVAL,
                    _ => status::REJECTED,
                });
            }
            PacketKind::CellWrite => {
                let count = u8::try_from(self.payload.len()).map_err(|_| FrameError::TooLarge {
                    size: self.payload.len(),
                    max: usize::from(u8::MAX),
                })?;
                body.put_u8(CMD_WRITE);
                body.put_u8(FIRST_DOTS_REGISTER);
                body.put_u8(count);
                body.put_slice(&self.payload);
            }
            PacketKind::InputReport => {
                if self.payload.is_empty() {
                    return Err(FrameError::UnexpectedBody {
                        info_type: InfoType::DynamicDataBlock.into(),
                        reason: "input report must carry at least one byte",
                    });
                }
                body.put_slice(&self.payload);
            }
            PacketKind::Error => return Err(FrameError::NotEncodable(self.kind.name())),
        }

        Ok(body.freeze())
    }

    /// Classifies a validated frame body.
    pub(crate) fn from_body(
        info: InfoType,
        body: &Bytes,
        direction: Direction,
    ) -> Result<Self, FrameError> {
        let info_type = u8::from(info);
        let address = ModuleAddress::from_slice(body).ok_or(FrameError::BadLength {
            info_type,
            length: body.len(),
        })?;
        let rest = body.slice(ModuleAddress::LEN..);

        let (kind, payload) = match (info, direction) {
            (InfoType::DeviceDetection, Direction::Outbound) => {
                if body.len() != SHORT_DETECTION_LEN {
                    return Err(FrameError::BadLength {
                        info_type,
                        length: body.len(),
                    });
                }
                match rest[0] {
                    status::QUERY => (PacketKind::Handshake, Bytes::new()),
                    status::ARRIVAL => (PacketKind::Ack, Bytes::new()),
                    _ => {
                        return Err(FrameError::UnexpectedBody {
                            info_type,
                            reason: "unknown host detection status",
                        });
                    }
                }
            }
            (InfoType::DeviceDetection, Direction::Inbound) => {
                if body.len() != LONG_DETECTION_LEN {
                    return Err(FrameError::BadLength {
                        info_type,
                        length: body.len(),
                    });
                }
                let kind = match rest[4] {
                    status::ARRIVAL => PacketKind::HandshakeAck,
                    status::REMOVAL => PacketKind::Removal,
                    status::REJECTED => PacketKind::Rejected,
                    _ => {
                        return Err(FrameError::UnexpectedBody {
                            info_type,
                            reason: "unknown device detection status",
                        });
                    }
                };
                (kind, rest.slice(..4))
            }
            (InfoType::DynamicDataBlock, Direction::Outbound) => {
                if rest.len() < CELL_WRITE_HEADER_LEN {
                    return Err(FrameError::BadLength {
                        info_type,
                        length: body.len(),
                    });
                }
                let count = usize::from(rest[2]);
                if rest[0] != CMD_WRITE || rest.len() != CELL_WRITE_HEADER_LEN + count {
                    return Err(FrameError::UnexpectedBody {
                        info_type,
                        reason: "malformed cell write",
                    });
                }
                (PacketKind::CellWrite, rest.slice(CELL_WRITE_HEADER_LEN..))
            }
            (InfoType::DynamicDataBlock, Direction::Inbound) => (PacketKind::InputReport, rest),
        };

        Ok(Self {
            kind,
            address,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN: ModuleAddress = ModuleAddress([0x80, 0x41, 0x00, 0x01]);

    #[test]
    fn test_info_type_from_byte() {
        assert_eq!(InfoType::from_byte(0x50), Some(InfoType::DeviceDetection));
        assert_eq!(InfoType::from_byte(0x51), Some(InfoType::DynamicDataBlock));
        assert_eq!(InfoType::from_byte(0x1b), None);
    }

    #[test]
    fn test_handshake_body() {
        let body = Packet::handshake().body().unwrap();
        assert_eq!(&body[..], &[0, 0, 0, 0, status::QUERY]);
    }

    #[test]
    fn test_cell_write_body() {
        let body = Packet::cell_write(MAIN, &[0x01, 0xff]).body().unwrap();
        assert_eq!(
            &body[..],
            &[0x80, 0x41, 0x00, 0x01, CMD_WRITE, FIRST_DOTS_REGISTER, 2, 0x01, 0xff]
        );
    }

    #[test]
    fn test_unrepresentable_payloads_rejected() {
        let ack = Packet::new(PacketKind::Ack, MAIN, Bytes::from_static(&[9, 9]));
        assert!(matches!(
            ack.body(),
            Err(FrameError::UnexpectedBody { info_type: 0x50, .. })
        ));
        let query = Packet::new(PacketKind::Handshake, MAIN, Bytes::from_static(&[1]));
        assert!(query.body().is_err());

        let report = Packet::new(PacketKind::InputReport, MAIN, Bytes::new());
        assert!(matches!(
            report.body(),
            Err(FrameError::UnexpectedBody { info_type: 0x51, .. })
        ));
        let report = Packet::new(PacketKind::InputReport, MAIN, Bytes::from_static(&[0x04]));
        assert_eq!(report.body().unwrap().len(), 5);
    }

    #[test]
    fn test_arrival_classification() {
        let body = Bytes::from_static(&[0x90, 0x41, 0, 2, 9, 8, 7, 6, status::ARRIVAL]);
        let packet = Packet::from_body(InfoType::DeviceDetection, &body, Direction::Inbound)
            .unwrap();
        assert_eq!(packet.kind, PacketKind::HandshakeAck);
        assert_eq!(packet.address, ModuleAddress([0x90, 0x41, 0, 2]));
        assert_eq!(packet.serial(), Some([9, 8, 7, 6]));

        let body = Bytes::from_static(&[0x90, 0x41, 0, 2, 9, 8, 7, 6, status::REMOVAL]);
        let packet = Packet::from_body(InfoType::DeviceDetection, &body, Direction::Inbound)
            .unwrap();
        assert_eq!(packet.kind, PacketKind::Removal);
    }

    #[test]
    fn test_short_detection_rejected_inbound() {
        let body = Bytes::from_static(&[0x90, 0x41, 0, 2, status::ARRIVAL]);
        let err = Packet::from_body(InfoType::DeviceDetection, &body, Direction::Inbound)
            .unwrap_err();
        assert_eq!(
            err,
            FrameError::BadLength {
                info_type: 0x50,
                length: 5
            }
        );
    }

    #[test]
    fn test_error_not_encodable() {
        let packet = Packet::new(PacketKind::Error, MAIN, Bytes::new());
        assert_eq!(packet.body(), Err(FrameError::NotEncodable("error")));
    }

    #[test]
    fn test_kind_directions() {
        assert_eq!(PacketKind::Handshake.direction(), Direction::Outbound);
        assert_eq!(PacketKind::InputReport.direction(), Direction::Inbound);
        assert_eq!(PacketKind::Error.info_type(), None);
    }
}
