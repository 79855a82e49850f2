//! Self-provisioning with static credentials.
//!
//! A node derives its unicast address from its device id and installs a
//! fixed network key and application key, the way a development board
//! provisions itself on the first button press.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use meshlight_onoff::{Address, AppKeyIndex, Binding};
use meshlight_transfer::{Identity, NetworkId};
use serde::Serialize;

/// Network key installed when none is configured.
pub const DEFAULT_NET_KEY: [u8; 16] = [
    0xd2, 0xa0, 0xe7, 0x8a, 0x12, 0xd0, 0xf6, 0xc9, 0xa2, 0xb8, 0xe9, 0x38, 0xdb, 0xe4, 0xf5, 0x7c,
];

/// Application key installed when none is configured.
pub const DEFAULT_APP_KEY: [u8; 16] = [
    0x3c, 0xde, 0x18, 0xe7, 0xe3, 0xa2, 0xc5, 0x6e, 0x8d, 0x6a, 0x1b, 0x0a, 0x7b, 0x20, 0xd2, 0xa5,
];

/// Device id used when the hardware id is unavailable.
pub const FALLBACK_DEVICE_ID: [u8; 2] = [0xdd, 0xdd];

const NETWORK_ID_CONTEXT: &str = "meshlight 2024-06 network id";

/// Keys and key indices a node is provisioned with.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub net_key: [u8; 16],
    pub app_key: [u8; 16],
    pub net_idx: u16,
    pub app_idx: AppKeyIndex,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            net_key: DEFAULT_NET_KEY,
            app_key: DEFAULT_APP_KEY,
            net_idx: 0,
            app_idx: 0,
        }
    }
}

// Keys stay out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("network_id", &self.network_id())
            .field("net_idx", &self.net_idx)
            .field("app_idx", &self.app_idx)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// 4-byte tag scoping frames to the network of `net_key`.
    pub fn network_id(&self) -> NetworkId {
        let digest = blake3::derive_key(NETWORK_ID_CONTEXT, &self.net_key);
        let mut id = [0u8; 4];
        id.copy_from_slice(&digest[..4]);
        NetworkId(id)
    }
}

/// Result of provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Provisioned {
    pub address: Address,
    pub binding: Binding,
    pub network_id: NetworkId,
}

impl Provisioned {
    /// Transport identity for this node.
    pub fn identity(&self) -> Identity {
        Identity {
            network_id: self.network_id,
            address: self.address,
            app_keys: self.binding.app_idx().into_iter().collect(),
        }
    }
}

/// Unicast address for a device id.
///
/// The first two bytes read little-endian and masked to 15 bits. Ids shorter
/// than two bytes use [`FALLBACK_DEVICE_ID`]; a zero result maps to `0x0001`.
pub fn derive_address(device_id: &[u8]) -> Address {
    let id = match device_id {
        [lo, hi, ..] => [*lo, *hi],
        _ => FALLBACK_DEVICE_ID,
    };
    let raw = u16::from_le_bytes(id) & Address::UNICAST_MASK;
    Address(raw.max(1))
}

/// Device id for a node configured without one.
///
/// The first id of a process is random. Later ids in the same process follow
/// it, so up to 32767 nodes sharing a process derive distinct addresses.
pub fn generated_device_id() -> [u8; 2] {
    static BASE: OnceLock<u32> = OnceLock::new();
    static NEXT: AtomicU32 = AtomicU32::new(0);

    let base = *BASE.get_or_init(|| u32::from(rand::random::<u16>()));
    let seq = NEXT.fetch_add(1, Ordering::Relaxed);
    let span = u32::from(Address::UNICAST_MASK);
    // 1..=0x7fff, never the zero address
    let raw = base.wrapping_add(seq) % span + 1;
    (raw as u16).to_le_bytes()
}

/// Provision a node with `credentials`.
pub fn provision(credentials: &Credentials, device_id: &[u8]) -> Provisioned {
    Provisioned {
        address: derive_address(device_id),
        binding: Binding::Bound(credentials.app_idx),
        network_id: credentials.network_id(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_device_id() {
        assert_eq!(derive_address(&[0x34, 0x12, 0xff]), Address(0x1234));
        assert_eq!(derive_address(&[0xff, 0xff]), Address(0x7fff));
        assert_eq!(derive_address(&[0x00, 0x80]), Address(0x0001));
    }

    #[test]
    fn test_fallback_address() {
        assert_eq!(derive_address(&[]), Address(0xdddd & 0x7fff));
        assert_eq!(derive_address(&[0x01]), Address(0x5ddd));
    }

    #[test]
    fn test_generated_ids_are_distinct_unicast() {
        let addresses: Vec<Address> = (0..64)
            .map(|_| derive_address(&generated_device_id()))
            .collect();

        for (i, a) in addresses.iter().enumerate() {
            assert!(a.is_unicast(), "{} is not unicast", a);
            assert!(!addresses[i + 1..].contains(a), "{} generated twice", a);
        }
    }

    #[test]
    fn test_network_id_depends_on_net_key() {
        let a = Credentials::default();
        let mut b = Credentials::default();
        b.net_key[0] ^= 1;

        assert_eq!(a.network_id(), Credentials::default().network_id());
        assert_ne!(a.network_id(), b.network_id());
    }

    #[test]
    fn test_provision_binds_app_key() {
        let creds = Credentials {
            app_idx: 2,
            ..Default::default()
        };
        let p = provision(&creds, &[0x05, 0x00]);

        assert_eq!(p.address, Address(5));
        assert_eq!(p.binding, Binding::Bound(2));
        assert_eq!(p.identity().app_keys, vec![2]);
        assert_eq!(p.identity().network_id, creds.network_id());
    }

    #[test]
    fn test_debug_hides_keys() {
        let shown = format!("{:?}", Credentials::default());
        assert!(!shown.contains("net_key"));
        assert!(!shown.contains("app_key"));
        assert!(shown.contains("network_id"));
    }
}
