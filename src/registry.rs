//! Module registry and enumeration.
//!
//! At connect time the driver broadcasts a module query and collects the
//! arrival announcements. The resulting registry is frozen for the
//! session: the main module comes first, auxiliaries follow in arrival
//! order, and every module's cell offset is the prefix sum of the cell
//! counts before it.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{EnumerationError, Result};
use crate::protocol::{FrameCheck, FrameDecoder, Packet, PacketKind, encode_frame};
use crate::transport::Transport;
use crate::types::{Module, ModuleAddress, ModuleKind};

/// Default quiet period that ends enumeration once a main module is known.
pub const DEFAULT_SILENCE: Duration = Duration::from_millis(300);

/// Default upper bound on enumeration.
pub const DEFAULT_ENUMERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between repeated queries while no main module answered.
pub const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_millis(100);

/// Enumeration timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumerationConfig {
    /// Quiet period after the last arrival.
    pub silence: Duration,
    /// Upper bound on the whole exchange.
    pub timeout: Duration,
    /// Query repeat interval until a main module answers.
    pub query_interval: Duration,
}

impl Default for EnumerationConfig {
    fn default() -> Self {
        Self {
            silence: DEFAULT_SILENCE,
            timeout: DEFAULT_ENUMERATION_TIMEOUT,
            query_interval: DEFAULT_QUERY_INTERVAL,
        }
    }
}

impl EnumerationConfig {
    /// Sets the quiet period.
    #[must_use]
    pub const fn silence(mut self, silence: Duration) -> Self {
        self.silence = silence;
        self
    }

    /// Sets the overall timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the query repeat interval.
    #[must_use]
    pub const fn query_interval(mut self, interval: Duration) -> Self {
        self.query_interval = interval;
        self
    }
}

/// The ordered set of modules present for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRegistry {
    modules: Vec<Module>,
    total_cells: usize,
}

impl ModuleRegistry {
    /// Builds a registry from modules in arrival order.
    ///
    /// The first main module is moved to the front; further main modules
    /// and repeated addresses are dropped. Offsets are assigned here and
    /// nowhere else.
    pub fn from_arrivals(
        arrivals: impl IntoIterator<Item = Module>,
    ) -> std::result::Result<Self, EnumerationError> {
        let mut main: Option<Module> = None;
        let mut others: Vec<Module> = Vec::new();

        for module in arrivals {
            let seen = main.as_ref().is_some_and(|m| m.address == module.address)
                || others.iter().any(|m| m.address == module.address);
            if seen {
                tracing::debug!("ignoring repeated arrival of {}", module.address);
                continue;
            }
            if module.kind == ModuleKind::Main {
                if let Some(existing) = &main {
                    tracing::warn!(
                        "ignoring second main module {} (already have {})",
                        module.address,
                        existing.address
                    );
                    continue;
                }
                main = Some(module);
            } else {
                others.push(module);
            }
        }

        let main = main.ok_or(EnumerationError::NoMainModule { timeout_ms: 0 })?;

        let mut modules = Vec::with_capacity(others.len() + 1);
        modules.push(main);
        modules.extend(others);

        let mut offset = 0;
        for module in &mut modules {
            module.cell_offset = offset;
            offset += module.cell_count;
        }

        Ok(Self {
            modules,
            total_cells: offset,
        })
    }

    /// Returns the modules in registry order.
    #[must_use]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Returns the main module.
    #[must_use]
    pub fn main(&self) -> &Module {
        // from_arrivals guarantees a main module at index 0
        &self.modules[0]
    }

    /// Looks up a module by address.
    #[must_use]
    pub fn get(&self, address: ModuleAddress) -> Option<&Module> {
        self.modules.iter().find(|m| m.address == address)
    }

    /// Returns the concatenated display length reported to the host.
    #[must_use]
    pub const fn total_cells(&self) -> usize {
        self.total_cells
    }

    /// Returns the number of logical keys over all modules.
    #[must_use]
    pub fn total_keys(&self) -> usize {
        self.modules.iter().map(|m| m.key_count).sum()
    }

    /// Maps a module-local cell index to the concatenated display.
    #[must_use]
    pub fn logical_cell(&self, address: ModuleAddress, local: usize) -> Option<usize> {
        let module = self.get(address)?;
        (local < module.cell_count).then_some(module.cell_offset + local)
    }

    /// Returns the number of modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Always false: a registry holds at least the main module.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

async fn send<T: Transport + ?Sized>(
    transport: &mut T,
    packet: &Packet,
    check: FrameCheck,
) -> Result<()> {
    let frame = encode_frame(packet, check)?;
    transport.write(frame).await
}

/// Runs the enumeration handshake over an open transport.
///
/// Every arrival is acknowledged. The query is repeated while no main
/// module has answered. Enumeration ends once a main module is known and
/// `silence` passes without a new arrival, or when `timeout` elapses.
pub async fn enumerate<T: Transport + ?Sized>(
    transport: &mut T,
    decoder: &mut FrameDecoder,
    check: FrameCheck,
    config: &EnumerationConfig,
) -> Result<ModuleRegistry> {
    let started = Instant::now();
    let deadline = started + config.timeout;
    let mut arrivals: Vec<Module> = Vec::new();
    let mut have_main = false;
    let mut last_arrival = started;

    tracing::debug!("querying modules");
    send(transport, &Packet::handshake(), check).await?;
    let mut next_query = started + config.query_interval;

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        if have_main && now >= last_arrival + config.silence {
            break;
        }
        if !have_main && now >= next_query {
            send(transport, &Packet::handshake(), check).await?;
            next_query = now + config.query_interval;
        }

        let until = if have_main {
            last_arrival + config.silence
        } else {
            next_query
        };
        let wait = until.min(deadline).saturating_duration_since(now);
        if !transport.wait_for_data(wait).await? {
            continue;
        }

        decoder.feed(&transport.read_available());
        let packets: Vec<Packet> = decoder.packets().collect();
        for packet in packets {
            match packet.kind {
                PacketKind::HandshakeAck => {
                    let serial = packet.serial().unwrap_or_default();
                    let module = Module::from_arrival(packet.address, serial);
                    tracing::info!(
                        "{} module {} arrived ({} cells)",
                        module.kind,
                        module.address,
                        module.cell_count
                    );
                    send(transport, &Packet::ack(packet.address), check).await?;
                    have_main |= module.kind == ModuleKind::Main;
                    last_arrival = Instant::now();
                    arrivals.push(module);
                }
                PacketKind::Removal => {
                    tracing::info!("module {} removed during enumeration", packet.address);
                    arrivals.retain(|m| m.address != packet.address);
                    have_main = arrivals.iter().any(|m| m.kind == ModuleKind::Main);
                    last_arrival = Instant::now();
                }
                PacketKind::Rejected => {
                    tracing::warn!(
                        "device rejected module {} (address conflict on the link)",
                        packet.address
                    );
                }
                kind => {
                    tracing::trace!("ignoring {} during enumeration", kind.name());
                }
            }
        }
    }

    let registry = ModuleRegistry::from_arrivals(arrivals).map_err(|_| {
        EnumerationError::NoMainModule {
            timeout_ms: u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    })?;
    tracing::info!(
        "enumerated {} module(s), {} cells in {:?}",
        registry.len(),
        registry.total_cells(),
        started.elapsed()
    );
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::transport::MemoryTransport;

    const MAIN80: ModuleAddress = ModuleAddress([0x80, 0x41, 0, 1]);
    const STATUS: ModuleAddress = ModuleAddress([0x90, 0x41, 0, 2]);
    const PHONE: ModuleAddress = ModuleAddress([0x91, 0x41, 0, 3]);
    const TASO: ModuleAddress = ModuleAddress([0x95, 0x41, 0, 4]);

    fn module(address: ModuleAddress) -> Module {
        Module::from_arrival(address, [0; 4])
    }

    fn arrival(address: ModuleAddress) -> Packet {
        Packet::new(
            PacketKind::HandshakeAck,
            address,
            Bytes::from_static(&[0, 0, 0, 1]),
        )
    }

    #[test]
    fn test_offsets_are_prefix_sums() {
        let registry =
            ModuleRegistry::from_arrivals([module(STATUS), module(MAIN80), module(PHONE)])
                .unwrap();

        let kinds: Vec<_> = registry.modules().iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![ModuleKind::Main, ModuleKind::Status, ModuleKind::Telephone]
        );
        let offsets: Vec<_> = registry.modules().iter().map(|m| m.cell_offset).collect();
        assert_eq!(offsets, vec![0, 80, 84]);
        assert_eq!(registry.total_cells(), 96);

        // No gaps and no overlaps.
        let mut expected = 0;
        for module in registry.modules() {
            assert_eq!(module.cell_range().start, expected);
            expected = module.cell_range().end;
        }
        assert_eq!(expected, registry.total_cells());
    }

    #[test]
    fn test_input_only_module_takes_no_cells() {
        let registry =
            ModuleRegistry::from_arrivals([module(MAIN80), module(TASO), module(STATUS)])
                .unwrap();
        assert_eq!(registry.total_cells(), 84);
        assert_eq!(registry.get(TASO).unwrap().cell_offset, 80);
        assert_eq!(registry.get(STATUS).unwrap().cell_offset, 80);
        assert_eq!(registry.total_keys(), 18 + 18 + 4);
    }

    #[test]
    fn test_no_main_module() {
        let err = ModuleRegistry::from_arrivals([module(STATUS)]).unwrap_err();
        assert!(matches!(err, EnumerationError::NoMainModule { .. }));
    }

    #[test]
    fn test_duplicates_and_second_main_ignored() {
        let second_main = ModuleAddress([0x81, 0x41, 0, 9]);
        let registry = ModuleRegistry::from_arrivals([
            module(MAIN80),
            module(STATUS),
            module(STATUS),
            module(second_main),
        ])
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.main().address, MAIN80);
    }

    #[test]
    fn test_logical_cell() {
        let registry =
            ModuleRegistry::from_arrivals([module(MAIN80), module(STATUS), module(PHONE)])
                .unwrap();
        assert_eq!(registry.logical_cell(MAIN80, 5), Some(5));
        assert_eq!(registry.logical_cell(PHONE, 11), Some(95));
        assert_eq!(registry.logical_cell(PHONE, 12), None);
        assert_eq!(registry.logical_cell(TASO, 0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumerate_acknowledges_arrivals() {
        let (mut transport, handle) = MemoryTransport::new();
        handle.set_responder(FrameCheck::None, |packet| {
            if packet.kind == PacketKind::Handshake {
                vec![arrival(MAIN80), arrival(STATUS), arrival(PHONE)]
            } else {
                Vec::new()
            }
        });
        transport.open().await.unwrap();

        let mut decoder = FrameDecoder::new();
        let registry = enumerate(
            &mut transport,
            &mut decoder,
            FrameCheck::None,
            &EnumerationConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(registry.total_cells(), 96);
        let sent = handle.written_packets(FrameCheck::None);
        assert_eq!(
            sent,
            vec![
                Packet::handshake(),
                Packet::ack(MAIN80),
                Packet::ack(STATUS),
                Packet::ack(PHONE),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumerate_drops_removed_module() {
        let (mut transport, handle) = MemoryTransport::new();
        handle.set_responder(FrameCheck::None, |packet| {
            if packet.kind == PacketKind::Handshake {
                let removal =
                    Packet::new(PacketKind::Removal, STATUS, Bytes::from_static(&[0, 0, 0, 1]));
                vec![arrival(MAIN80), arrival(STATUS), removal]
            } else {
                Vec::new()
            }
        });
        transport.open().await.unwrap();

        let registry = enumerate(
            &mut transport,
            &mut FrameDecoder::new(),
            FrameCheck::None,
            &EnumerationConfig::default(),
        )
        .await
        .unwrap();

        assert!(registry.get(STATUS).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.total_cells(), 80);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumerate_requeries_after_main_removed() {
        let (mut transport, handle) = MemoryTransport::new();
        let mut queries = 0;
        handle.set_responder(FrameCheck::None, move |packet| {
            if packet.kind != PacketKind::Handshake {
                return Vec::new();
            }
            queries += 1;
            if queries == 1 {
                let removal =
                    Packet::new(PacketKind::Removal, MAIN80, Bytes::from_static(&[0, 0, 0, 1]));
                vec![arrival(MAIN80), removal]
            } else {
                vec![arrival(MAIN80)]
            }
        });
        transport.open().await.unwrap();

        let registry = enumerate(
            &mut transport,
            &mut FrameDecoder::new(),
            FrameCheck::None,
            &EnumerationConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(registry.main().address, MAIN80);
        let handshakes = handle
            .written_packets(FrameCheck::None)
            .into_iter()
            .filter(|p| p.kind == PacketKind::Handshake)
            .count();
        assert_eq!(handshakes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumerate_repeats_query_until_main_answers() {
        let (mut transport, handle) = MemoryTransport::new();
        let mut queries = 0;
        handle.set_responder(FrameCheck::None, move |packet| {
            if packet.kind != PacketKind::Handshake {
                return Vec::new();
            }
            queries += 1;
            if queries == 3 {
                vec![arrival(MAIN80)]
            } else {
                Vec::new()
            }
        });
        transport.open().await.unwrap();

        let started = Instant::now();
        let registry = enumerate(
            &mut transport,
            &mut FrameDecoder::new(),
            FrameCheck::None,
            &EnumerationConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(started.elapsed() < DEFAULT_ENUMERATION_TIMEOUT);
        let handshakes = handle
            .written_packets(FrameCheck::None)
            .into_iter()
            .filter(|p| p.kind == PacketKind::Handshake)
            .count();
        assert_eq!(handshakes, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumerate_times_out_without_main() {
        let (mut transport, handle) = MemoryTransport::new();
        handle.set_responder(FrameCheck::None, |packet| {
            if packet.kind == PacketKind::Handshake {
                vec![arrival(STATUS)]
            } else {
                Vec::new()
            }
        });
        transport.open().await.unwrap();

        let config = EnumerationConfig::default().timeout(Duration::from_secs(2));
        let started = Instant::now();
        let err = enumerate(
            &mut transport,
            &mut FrameDecoder::new(),
            FrameCheck::None,
            &config,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            crate::error::DriverError::Enumeration(EnumerationError::NoMainModule {
                timeout_ms: 2000
            })
        ));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
