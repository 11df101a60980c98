//! Module identity and capability types.

use std::fmt;

/// Family marker carried in byte 1 of every VarioPro module address.
pub const FAMILY_MARKER: u8 = 0x41;

/// A 4-byte module address as reported in detection packets.
///
/// Byte 0 is the module type code, byte 1 the family marker, and
/// bytes 2-3 distinguish instances on the link.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ModuleAddress(pub [u8; 4]);

impl ModuleAddress {
    /// The all-zero address targeted by the global handshake.
    pub const BROADCAST: Self = Self([0; 4]);

    /// Size of an address on the wire.
    pub const LEN: usize = 4;

    /// Creates an address from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Reads an address from the first four bytes of a slice.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let bytes: [u8; 4] = data.get(..Self::LEN)?.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Returns true for the broadcast address.
    #[must_use]
    pub const fn is_broadcast(&self) -> bool {
        matches!(self.0, [0, 0, 0, 0])
    }

    /// Returns the address as a hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses an address from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let bytes: [u8; 4] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for ModuleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleAddress({})", self.to_hex())
    }
}

impl fmt::Display for ModuleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Physical module kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Main tactile display.
    Main,
    /// Four-cell status module.
    Status,
    /// Telephone keypad module with twelve cells.
    Telephone,
    /// TASO navigation module (sliders, wheel, numpad). Input only.
    Taso,
    /// Module type this driver does not know.
    Unknown,
}

impl ModuleKind {
    /// Returns a short human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Status => "status",
            Self::Telephone => "telephone",
            Self::Taso => "taso",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static capabilities implied by a module type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Module kind.
    pub kind: ModuleKind,
    /// Number of braille cells.
    pub cell_count: usize,
    /// Number of logical keys.
    pub key_count: usize,
    /// Number of routing buttons.
    pub routing_cell_count: usize,
}

impl Capabilities {
    /// Looks up capabilities for an address.
    #[must_use]
    pub const fn for_address(address: ModuleAddress) -> Self {
        let [code, marker, ..] = address.0;
        if marker != FAMILY_MARKER {
            return Self::UNKNOWN;
        }
        match code {
            0x80 => Self::main(80, 4),
            0x81 => Self::main(64, 3),
            0x90 => Self {
                kind: ModuleKind::Status,
                cell_count: 4,
                key_count: 4,
                routing_cell_count: 0,
            },
            0x91 => Self {
                kind: ModuleKind::Telephone,
                cell_count: 12,
                key_count: 21,
                routing_cell_count: 0,
            },
            0x95 => Self {
                kind: ModuleKind::Taso,
                cell_count: 0,
                key_count: 18,
                routing_cell_count: 0,
            },
            _ => Self::UNKNOWN,
        }
    }

    const UNKNOWN: Self = Self {
        kind: ModuleKind::Unknown,
        cell_count: 0,
        key_count: 0,
        routing_cell_count: 0,
    };

    // Six display keys plus up/down/push per wheel.
    const fn main(cells: usize, wheels: usize) -> Self {
        Self {
            kind: ModuleKind::Main,
            cell_count: cells,
            key_count: 6 + wheels * 3,
            routing_cell_count: cells,
        }
    }
}

/// One physical module attached to the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Protocol address.
    pub address: ModuleAddress,
    /// Module kind.
    pub kind: ModuleKind,
    /// Serial number reported at arrival.
    pub serial: [u8; 4],
    /// Number of braille cells (0 if input-only).
    pub cell_count: usize,
    /// Number of logical keys.
    pub key_count: usize,
    /// Number of routing buttons.
    pub routing_cell_count: usize,
    /// Position of the first cell in the concatenated display.
    pub cell_offset: usize,
}

impl Module {
    /// Builds a module record from an arrival announcement.
    ///
    /// The offset is assigned later by the registry.
    #[must_use]
    pub const fn from_arrival(address: ModuleAddress, serial: [u8; 4]) -> Self {
        let caps = Capabilities::for_address(address);
        Self {
            address,
            kind: caps.kind,
            serial,
            cell_count: caps.cell_count,
            key_count: caps.key_count,
            routing_cell_count: caps.routing_cell_count,
            cell_offset: 0,
        }
    }

    /// Returns true if the module has braille cells.
    #[must_use]
    pub const fn has_braille(&self) -> bool {
        self.cell_count > 0
    }

    /// Returns the range of this module's cells in the concatenated display.
    #[must_use]
    pub const fn cell_range(&self) -> std::ops::Range<usize> {
        self.cell_offset..self.cell_offset + self.cell_count
    }
}
