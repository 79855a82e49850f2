//! What a node needs from its transport beyond plain send/receive

use std::sync::atomic::{AtomicU64, Ordering};

use meshlight_onoff::Transport;
use serde::Serialize;

use crate::types::Identity;

/// A [`Transport`] that can be (re)configured once provisioning completes
pub trait MeshLink: Transport {
    /// Install the identity frames are sent and filtered with
    fn set_identity(&self, identity: Identity);

    /// Current identity, `None` while unprovisioned
    fn identity(&self) -> Option<Identity>;
}

/// Frame counters for a link
#[derive(Debug, Default)]
pub struct LinkStats {
    sent: AtomicU64,
    received: AtomicU64,
    filtered: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of [`LinkStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStatsSnapshot {
    pub sent: u64,
    pub received: u64,
    pub filtered: u64,
    pub malformed: u64,
}

impl LinkStats {
    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}
