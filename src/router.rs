//! Splits the logical cell buffer across display modules.

use crate::error::RoutingError;
use crate::protocol::Packet;
use crate::registry::ModuleRegistry;
use crate::types::ModuleAddress;

/// The cells destined for one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellWrite<'a> {
    /// Target module.
    pub address: ModuleAddress,
    /// Dot patterns, one byte per cell.
    pub cells: &'a [u8],
}

impl CellWrite<'_> {
    /// Builds the packet carrying this write.
    #[must_use]
    pub fn to_packet(&self) -> Packet {
        Packet::cell_write(self.address, self.cells)
    }
}

/// Routes a logical buffer to the modules of a registry.
///
/// The buffer must hold exactly `registry.total_cells()` cells. Modules
/// without cells receive nothing; the writes come back in registry order
/// and together cover the buffer exactly once.
pub fn route<'a>(
    buffer: &'a [u8],
    registry: &ModuleRegistry,
) -> Result<Vec<CellWrite<'a>>, RoutingError> {
    let expected = registry.total_cells();
    if buffer.len() != expected {
        return Err(RoutingError::LengthMismatch {
            expected,
            actual: buffer.len(),
        });
    }

    Ok(registry
        .modules()
        .iter()
        .filter(|m| m.has_braille())
        .map(|m| CellWrite {
            address: m.address,
            cells: &buffer[m.cell_range()],
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketKind;
    use crate::types::Module;

    const MAIN: ModuleAddress = ModuleAddress([0x80, 0x41, 0, 1]);
    const STATUS: ModuleAddress = ModuleAddress([0x90, 0x41, 0, 2]);
    const PHONE: ModuleAddress = ModuleAddress([0x91, 0x41, 0, 3]);
    const TASO: ModuleAddress = ModuleAddress([0x95, 0x41, 0, 4]);

    fn registry(addresses: &[ModuleAddress]) -> ModuleRegistry {
        ModuleRegistry::from_arrivals(addresses.iter().map(|&a| Module::from_arrival(a, [0; 4])))
            .unwrap()
    }

    #[test]
    fn test_route_three_modules() {
        let registry = registry(&[MAIN, STATUS, PHONE]);
        let buffer: Vec<u8> = (0..96).map(|i| i as u8).collect();

        let writes = route(&buffer, &registry).unwrap();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].address, MAIN);
        assert_eq!(writes[0].cells, &buffer[0..80]);
        assert_eq!(writes[1].address, STATUS);
        assert_eq!(writes[1].cells, &buffer[80..84]);
        assert_eq!(writes[2].address, PHONE);
        assert_eq!(writes[2].cells, &buffer[84..96]);

        let packet = writes[1].to_packet();
        assert_eq!(packet.kind, PacketKind::CellWrite);
        assert_eq!(&packet.payload[..], &[80, 81, 82, 83]);
    }

    #[test]
    fn test_route_partitions_buffer() {
        let registry = registry(&[PHONE, TASO, MAIN, STATUS]);
        let buffer: Vec<u8> = (0..registry.total_cells()).map(|i| (i * 7) as u8).collect();

        let writes = route(&buffer, &registry).unwrap();
        assert!(writes.iter().all(|w| w.address != TASO));
        let joined: Vec<u8> = writes.iter().flat_map(|w| w.cells.iter().copied()).collect();
        assert_eq!(joined, buffer);
    }

    #[test]
    fn test_route_length_mismatch() {
        let registry = registry(&[MAIN, STATUS, PHONE]);
        let err = route(&[0; 50], &registry).unwrap_err();
        assert_eq!(
            err,
            RoutingError::LengthMismatch {
                expected: 96,
                actual: 50
            }
        );
        assert!(route(&[0; 97], &registry).is_err());
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;
    use crate::registry::strategies::arrivals;

    proptest! {
        #[test]
        fn test_route_covers_buffer_once(arrivals in arrivals(), seed in any::<u8>()) {
            let Ok(registry) = ModuleRegistry::from_arrivals(arrivals) else {
                return Ok(());
            };
            let buffer: Vec<u8> = (0..registry.total_cells())
                .map(|i| (i as u8).wrapping_add(seed))
                .collect();

            let writes = route(&buffer, &registry).unwrap();
            prop_assert!(writes.iter().all(|w| !w.cells.is_empty()));
            let joined: Vec<u8> = writes.iter().flat_map(|w| w.cells.iter().copied()).collect();
            prop_assert_eq!(joined, buffer);

            let short = vec![0; registry.total_cells().saturating_sub(1)];
            prop_assert!(route(&short, &registry).is_err());
        }
    }
}
