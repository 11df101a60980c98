//! Logical input events produced by the input decoder.

use std::fmt;

use tokio::time::Instant;

use crate::types::module::ModuleAddress;

/// A logical key identifier.
///
/// Keys are named the way host gesture tables refer to them
/// (`d1`, `wu2`, `tmk*`, `thsl`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(&'static str);

impl Key {
    /// Creates a key from its name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the key name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Gesture event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GestureKind {
    /// Keys went down.
    KeyDown,
    /// Previously reported keys went up.
    KeyUp,
    /// A routing button went down.
    RoutingPress,
    /// A routing button went up.
    RoutingRelease,
    /// All keys of a module are up again; carries every key that was
    /// held since the module was last idle.
    Chord,
}

/// Payload of a gesture event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GestureCode {
    /// Set of keys, sorted by name.
    Keys(Vec<Key>),
    /// Routing button index, local to the originating module.
    Routing(u16),
}

/// One logical input event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GestureEvent {
    /// Module the input came from.
    pub module: ModuleAddress,
    /// Event kind.
    pub kind: GestureKind,
    /// Keys or routing index.
    pub code: GestureCode,
    /// When the report carrying the input was decoded.
    pub timestamp: Instant,
}

impl GestureEvent {
    /// Returns the keys of a key or chord event.
    #[must_use]
    pub fn keys(&self) -> &[Key] {
        match &self.code {
            GestureCode::Keys(keys) => keys,
            GestureCode::Routing(_) => &[],
        }
    }

    /// Returns the routing index of a routing event.
    #[must_use]
    pub const fn routing_index(&self) -> Option<u16> {
        match self.code {
            GestureCode::Routing(index) => Some(index),
            GestureCode::Keys(_) => None,
        }
    }

    /// Returns a host-style identifier such as `d1+d4` or `routing`.
    #[must_use]
    pub fn id(&self) -> String {
        match &self.code {
            GestureCode::Keys(keys) => keys
                .iter()
                .map(Key::name)
                .collect::<Vec<_>>()
                .join("+"),
            GestureCode::Routing(_) => "routing".to_string(),
        }
    }
}
