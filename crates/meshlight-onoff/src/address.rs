//! Mesh element addresses and application key binding.

use serde::{Deserialize, Serialize};

/// A 16-bit mesh address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub u16);

impl Address {
    /// The unassigned address.
    pub const UNASSIGNED: Self = Self(0x0000);

    /// The all-nodes group address (broadcast).
    pub const ALL_NODES: Self = Self(0xFFFF);

    /// Mask selecting the unicast range.
    pub const UNICAST_MASK: u16 = 0x7FFF;

    /// Create an address from its raw value.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Unicast addresses are `0x0001..=0x7FFF`.
    pub const fn is_unicast(self) -> bool {
        self.0 != 0 && self.0 & 0x8000 == 0
    }

    /// Group, virtual and all-* addresses have the top bit set.
    pub const fn is_group(self) -> bool {
        self.0 & 0x8000 != 0
    }

    /// Whether a message sent to `self` is meant for the element at `local`.
    pub const fn accepts(self, local: Address) -> bool {
        self.is_group() || self.0 == local.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

impl From<u16> for Address {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

/// Index of an application key in the node's key list.
pub type AppKeyIndex = u16;

/// Whether a model holds a usable application key.
///
/// Supplied by provisioning and read-only for the models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Binding {
    /// No application key bound yet.
    #[default]
    Unbound,
    /// Bound to the given application key index.
    Bound(AppKeyIndex),
}

impl Binding {
    /// Check if an application key is bound.
    pub const fn is_bound(&self) -> bool {
        matches!(self, Binding::Bound(_))
    }

    /// The bound key index, if any.
    pub const fn app_idx(&self) -> Option<AppKeyIndex> {
        match self {
            Binding::Bound(idx) => Some(*idx),
            Binding::Unbound => None,
        }
    }
}
