//! Input report decoding.
//!
//! Every module kind has a fixed table mapping report bits to logical
//! keys. Byte 0 of a report holds change flags; the first flag set, in
//! the priority order of the module kind, selects which field the report
//! carries.
//!
//! Main module report (VarioPro 80; the 64 has three wheels, so every
//! field after the wheels sits one byte earlier):
//! ```text
//! [flags] [-] [wheel1..wheel4] [wheel push] [display keys] [routing bitmap...]
//! ```

use std::collections::{BTreeSet, HashMap};

use tokio::time::Instant;

use crate::protocol::{Packet, PacketKind};
use crate::registry::ModuleRegistry;
use crate::types::{GestureCode, GestureEvent, GestureKind, Key, Module, ModuleAddress, ModuleKind};

const DISPLAY_KEYS: &[&str] = &["d1", "d2", "d3", "d4", "d5", "d6"];
const WHEEL_UP: &[&str] = &["wu1", "wu2", "wu3", "wu4"];
const WHEEL_DOWN: &[&str] = &["wd1", "wd2", "wd3", "wd4"];
const WHEEL_PUSH: &[&str] = &["wp1", "wp2", "wp3", "wp4"];

const STATUS_KEYS: &[&str] = &["smc1", "smc2", "smc3", "smc4"];

const TELEPHONE_KEYS: &[&str] = &[
    "tmk1", "tmk2", "tmk3", "tmkA", "tmk4", "tmk5", "tmk6", "tmkB", "tmk7", "tmk8", "tmk9",
    "tmkC", "tmk*", "tmk0", "tmk#", "tmkD", "tmc1", "tmc2", "tmc3", "tmc4", "tmwp",
];
const TELEPHONE_WHEEL: (&str, &str) = ("tmwd", "tmwu");

const TASO_NUMPAD_KEYS: &[&str] = &[
    "tn1", "tn2", "tn3", "tn4", "tn5", "tn6", "tn7", "tn8", "tn9", "tn*", "tn0", "tn#", "tc1",
    "tc2", "tc3",
];
const TASO_PUSH_KEYS: &[&str] = &["thsp", "tvsp", "twp"];
const TASO_HORIZONTAL: (&str, &str) = ("thsl", "thsr");
const TASO_VERTICAL: (&str, &str) = ("tvsd", "tvsu");
const TASO_WHEEL: (&str, &str) = ("twl", "twr");

mod flags {
    pub const ROUTING: u8 = 0x08;
    pub const KEYS: u8 = 0x04;
    pub const WHEEL_PUSH: u8 = 0x02;
    pub const ROTATION: u8 = 0x01;

    pub const AUX_KEYS: u8 = 0x02;
    pub const AUX_WHEEL: u8 = 0x01;

    pub const TASO_KEYS: u8 = 0x08;
    pub const TASO_HORIZONTAL: u8 = 0x04;
    pub const TASO_VERTICAL: u8 = 0x02;
    pub const TASO_WHEEL: u8 = 0x01;
}

/// Input state tracked for one module.
#[derive(Debug, Clone)]
struct ModuleState {
    kind: ModuleKind,
    routing_cells: usize,
    down: BTreeSet<Key>,
    chord: BTreeSet<Key>,
    routing: Vec<u8>,
    horizontal: u8,
    vertical: u8,
}

impl ModuleState {
    fn new(module: &Module) -> Self {
        Self {
            kind: module.kind,
            routing_cells: module.routing_cell_count,
            down: BTreeSet::new(),
            chord: BTreeSet::new(),
            routing: vec![0; module.routing_cell_count.div_ceil(8)],
            horizontal: 0,
            vertical: 0,
        }
    }

    fn wheel_count(&self) -> usize {
        if self.routing_cells == 64 { 3 } else { 4 }
    }
}

/// Collects the events produced by one report.
struct Events {
    module: ModuleAddress,
    timestamp: Instant,
    events: Vec<GestureEvent>,
}

impl Events {
    fn push(&mut self, kind: GestureKind, code: GestureCode) {
        self.events.push(GestureEvent {
            module: self.module,
            kind,
            code,
            timestamp: self.timestamp,
        });
    }

    fn keys(&mut self, kind: GestureKind, mut keys: Vec<Key>) {
        if !keys.is_empty() {
            keys.sort_unstable();
            self.push(kind, GestureCode::Keys(keys));
        }
    }

    fn finish_chord(&mut self, state: &mut ModuleState) {
        if state.down.is_empty() && !state.chord.is_empty() {
            let chord = std::mem::take(&mut state.chord);
            self.push(GestureKind::Chord, GestureCode::Keys(chord.into_iter().collect()));
        }
    }

    /// Diffs a key bitmask against the tracked down set.
    fn apply_mask(&mut self, state: &mut ModuleState, table: &[&'static str], mask: u32) {
        let mut pressed = Vec::new();
        let mut released = Vec::new();
        for (bit, &name) in table.iter().enumerate() {
            let key = Key::new(name);
            if mask & (1 << bit) != 0 {
                if state.down.insert(key) {
                    state.chord.insert(key);
                    pressed.push(key);
                }
            } else if state.down.remove(&key) {
                released.push(key);
            }
        }
        self.keys(GestureKind::KeyDown, pressed);
        self.keys(GestureKind::KeyUp, released);
        self.finish_chord(state);
    }

    /// Reports a momentary key (wheel or slider step).
    fn pulse(&mut self, state: &mut ModuleState, name: &'static str, steps: u32) {
        let key = Key::new(name);
        for _ in 0..steps {
            if !state.down.insert(key) {
                tracing::debug!("step of {} while it is reported down", key);
                continue;
            }
            state.chord.insert(key);
            self.keys(GestureKind::KeyDown, vec![key]);
            state.down.remove(&key);
            self.keys(GestureKind::KeyUp, vec![key]);
            self.finish_chord(state);
        }
    }

    /// Reports signed rotation steps.
    fn rotate(&mut self, state: &mut ModuleState, raw: u8, (down, up): (&'static str, &'static str)) {
        let steps = i8::from_ne_bytes([raw]);
        if steps > 0 {
            self.pulse(state, up, u32::from(steps.unsigned_abs()));
        } else if steps < 0 {
            self.pulse(state, down, u32::from(steps.unsigned_abs()));
        }
    }

    /// Diffs a routing bitmap against the previous one.
    fn apply_routing(&mut self, state: &mut ModuleState, bitmap: &[u8]) {
        for (byte_index, (&now, prev)) in bitmap.iter().zip(state.routing.iter_mut()).enumerate() {
            let changed = now ^ *prev;
            for bit in 0..8 {
                if changed & (1 << bit) == 0 {
                    continue;
                }
                let index = byte_index * 8 + bit;
                if index >= state.routing_cells {
                    continue;
                }
                let kind = if now & (1 << bit) != 0 {
                    GestureKind::RoutingPress
                } else {
                    GestureKind::RoutingRelease
                };
                self.push(kind, GestureCode::Routing(index as u16));
            }
            *prev = now;
        }
    }
}

fn decode_main(state: &mut ModuleState, report: &[u8], out: &mut Events) -> Option<()> {
    let changed = *report.first()?;
    let wheels = state.wheel_count();
    let push_at = 2 + wheels;
    let keys_at = push_at + 1;
    let routing_at = keys_at + 1;

    if changed & flags::ROUTING != 0 {
        let bitmap = report.get(routing_at..routing_at + state.routing.len())?;
        out.apply_routing(state, bitmap);
    } else if changed & flags::KEYS != 0 {
        let keys = *report.get(keys_at)?;
        out.apply_mask(state, DISPLAY_KEYS, u32::from(keys));
    } else if changed & flags::WHEEL_PUSH != 0 {
        let push = *report.get(push_at)?;
        out.apply_mask(state, &WHEEL_PUSH[..wheels], u32::from(push));
    } else if changed & flags::ROTATION != 0 {
        let rotation = report.get(2..2 + wheels)?;
        for (wheel, &raw) in rotation.iter().enumerate() {
            out.rotate(state, raw, (WHEEL_DOWN[wheel], WHEEL_UP[wheel]));
        }
    }
    Some(())
}

fn decode_status(state: &mut ModuleState, report: &[u8], out: &mut Events) -> Option<()> {
    let changed = *report.first()?;
    if changed & flags::AUX_KEYS != 0 {
        let keys = *report.get(2)?;
        out.apply_mask(state, STATUS_KEYS, u32::from(keys & 0x0F));
    }
    Some(())
}

fn decode_telephone(state: &mut ModuleState, report: &[u8], out: &mut Events) -> Option<()> {
    let changed = *report.first()?;
    if changed & flags::AUX_KEYS != 0 {
        let keys = report.get(3..6)?;
        let mask = u32::from(keys[1])
            | u32::from(keys[2]) << 8
            | u32::from(keys[0] & 0x0F) << 16
            | u32::from(keys[0] >> 7) << 20;
        out.apply_mask(state, TELEPHONE_KEYS, mask);
    } else if changed & flags::AUX_WHEEL != 0 {
        let raw = *report.get(2)?;
        out.rotate(state, raw, TELEPHONE_WHEEL);
    }
    Some(())
}

fn slide(
    out: &mut Events,
    state: &mut ModuleState,
    previous: u8,
    position: u8,
    (towards_zero, away): (&'static str, &'static str),
) {
    let steps = u32::from(position.abs_diff(previous));
    let name = if position > previous { away } else { towards_zero };
    out.pulse(state, name, steps);
}

fn decode_taso(state: &mut ModuleState, report: &[u8], out: &mut Events) -> Option<()> {
    let changed = *report.first()?;
    if changed & flags::TASO_KEYS != 0 {
        let keys = report.get(5..8)?;
        let numpad = u32::from(keys[0]) | u32::from(keys[1]) << 8 | u32::from(keys[2] & 0x07) << 12;
        let push = u32::from((keys[2] >> 5) & 0x07);
        out.apply_mask(state, TASO_NUMPAD_KEYS, numpad);
        out.apply_mask(state, TASO_PUSH_KEYS, push);
    } else if changed & flags::TASO_HORIZONTAL != 0 {
        let position = *report.get(4)?;
        let previous = std::mem::replace(&mut state.horizontal, position);
        slide(out, state, previous, position, TASO_HORIZONTAL);
    } else if changed & flags::TASO_VERTICAL != 0 {
        let position = *report.get(3)?;
        let previous = std::mem::replace(&mut state.vertical, position);
        // The vertical slider counts downwards.
        let (down, up) = TASO_VERTICAL;
        slide(out, state, previous, position, (up, down));
    } else if changed & flags::TASO_WHEEL != 0 {
        let raw = *report.get(2)?;
        out.rotate(state, raw, TASO_WHEEL);
    }
    Some(())
}

/// Decodes input reports into gesture events.
#[derive(Debug, Clone, Default)]
pub struct InputDecoder {
    modules: HashMap<ModuleAddress, ModuleState>,
}

impl InputDecoder {
    /// Creates a decoder for the modules of a registry.
    #[must_use]
    pub fn new(registry: &ModuleRegistry) -> Self {
        Self {
            modules: registry
                .modules()
                .iter()
                .map(|m| (m.address, ModuleState::new(m)))
                .collect(),
        }
    }

    /// Decodes one packet.
    ///
    /// Packets that are not input reports, reports from modules outside
    /// the registry, and reports too short for their field produce no
    /// events.
    pub fn decode(&mut self, packet: &Packet, now: Instant) -> Vec<GestureEvent> {
        if packet.kind != PacketKind::InputReport {
            return Vec::new();
        }
        let Some(state) = self.modules.get_mut(&packet.address) else {
            tracing::debug!("input from unregistered module {}", packet.address);
            return Vec::new();
        };

        let mut out = Events {
            module: packet.address,
            timestamp: now,
            events: Vec::new(),
        };
        let report = &packet.payload[..];
        let decoded = match state.kind {
            ModuleKind::Main => decode_main(state, report, &mut out),
            ModuleKind::Status => decode_status(state, report, &mut out),
            ModuleKind::Telephone => decode_telephone(state, report, &mut out),
            ModuleKind::Taso => decode_taso(state, report, &mut out),
            ModuleKind::Unknown => Some(()),
        };
        if decoded.is_none() {
            tracing::debug!(
                "short {} report from {}: {}",
                state.kind,
                packet.address,
                hex::encode(report)
            );
        }
        out.events
    }

    /// Returns the keys currently held on a module.
    #[must_use]
    pub fn keys_down(&self, address: ModuleAddress) -> Vec<Key> {
        self.modules
            .get(&address)
            .map(|s| s.down.iter().copied().collect())
            .unwrap_or_default()
    }
}


#[cfg(test)]
mod proptests {
    use std::collections::BTreeSet;

    use bytes::Bytes;
    use proptest::collection::vec;
    use proptest::prelude::*;
    use proptest::sample::select;

    use super::*;

    const MODULES: [ModuleAddress; 5] = [
        ModuleAddress([0x80, 0x41, 0, 1]),
        ModuleAddress([0x90, 0x41, 0, 2]),
        ModuleAddress([0x91, 0x41, 0, 3]),
        ModuleAddress([0x95, 0x41, 0, 4]),
        ModuleAddress([0x81, 0x41, 0, 5]),
    ];

    fn reports() -> impl Strategy<Value = Vec<(ModuleAddress, Vec<u8>)>> {
        vec((select(MODULES.to_vec()), vec(any::<u8>(), 0..20)), 0..40)
    }

    proptest! {
        #[test]
        fn test_key_up_only_after_key_down(reports in reports()) {
            // The 64-cell main would be a second main module; decode it standalone.
            let registry = ModuleRegistry::from_arrivals(
                MODULES[..4].iter().map(|&a| Module::from_arrival(a, [0; 4])),
            )
            .unwrap();
            let mut input = InputDecoder::new(&registry);
            let standalone = ModuleRegistry::from_arrivals([Module::from_arrival(MODULES[4], [0; 4])])
                .unwrap();
            let mut input64 = InputDecoder::new(&standalone);
            let now = Instant::now();

            let mut down: HashMap<ModuleAddress, BTreeSet<Key>> = HashMap::new();
            for (address, payload) in reports {
                let packet = Packet::new(PacketKind::InputReport, address, Bytes::from(payload));
                let events = if address == MODULES[4] {
                    input64.decode(&packet, now)
                } else {
                    input.decode(&packet, now)
                };
                let held = down.entry(address).or_default();
                for event in events {
                    prop_assert_eq!(event.module, address);
                    match event.kind {
                        GestureKind::KeyDown => {
                            for key in event.keys() {
                                prop_assert!(held.insert(*key));
                            }
                        }
                        GestureKind::KeyUp => {
                            for key in event.keys() {
                                prop_assert!(held.remove(key));
                            }
                        }
                        GestureKind::Chord => prop_assert!(held.is_empty()),
                        GestureKind::RoutingPress | GestureKind::RoutingRelease => {
                            prop_assert!(event.routing_index().is_some());
                        }
                    }
                }
            }
        }
    }
}
