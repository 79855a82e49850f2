//! Generic OnOff client: turns local triggers into SET-UNACK broadcasts and
//! observes STATUS reports.
//!
//! The client keeps its own idea of the last value it asked for. It never
//! reads or writes a colocated server's state.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::address::{Address, Binding};
use crate::error::{Error, Result};
use crate::message::{OnOffSet, OnOffStatus, Opcode, PayloadLayout, PendingTarget, Timing};
use crate::server::on_off;
use crate::transport::{MessageContext, Transport};

/// Configuration for a state client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// This element's own unicast address.
    pub address: Address,
    /// Body layout spoken on the wire.
    pub layout: PayloadLayout,
    /// Where local triggers publish to.
    pub publish_to: Address,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: Address::UNASSIGNED,
            layout: PayloadLayout::default(),
            publish_to: Address::ALL_NODES,
        }
    }
}

impl ClientConfig {
    /// Config for the element at `address`, publishing to all nodes.
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    /// Set the wire layout.
    #[must_use]
    pub fn with_layout(mut self, layout: PayloadLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the publish destination.
    #[must_use]
    pub fn with_publish_to(mut self, dst: Address) -> Self {
        self.publish_to = dst;
        self
    }
}

/// A STATUS report seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedStatus {
    /// Reporting element (embedded address when present, else transport source).
    pub source: Address,
    pub present: bool,
    pub pending: Option<PendingTarget>,
}

impl std::fmt::Display for ObservedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.pending {
            Some(p) => write!(
                f,
                "{} -> {} ({}) from {}",
                on_off(self.present),
                on_off(p.target),
                p.remaining,
                self.source
            ),
            None => write!(f, "{} from {}", on_off(self.present), self.source),
        }
    }
}

/// Generic OnOff client for one element.
#[derive(Debug)]
pub struct StateClient {
    config: ClientConfig,
    binding: Binding,
    next_tid: u8,
    last_known: bool,
    last_status: Option<ObservedStatus>,
}

impl StateClient {
    /// Create an unbound client.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            binding: Binding::Unbound,
            next_tid: 0,
            last_known: false,
            last_status: None,
        }
    }

    /// Update the binding supplied by provisioning.
    pub fn set_binding(&mut self, binding: Binding) {
        self.binding = binding;
    }

    /// Update the element address (assigned at provisioning).
    pub fn set_address(&mut self, address: Address) {
        self.config.address = address;
    }

    /// Current binding.
    pub fn binding(&self) -> Binding {
        self.binding
    }

    /// Value the client last successfully asked for.
    pub fn last_known(&self) -> bool {
        self.last_known
    }

    /// Transaction id the next SET will carry.
    pub fn next_tid(&self) -> u8 {
        self.next_tid
    }

    /// Most recent STATUS observed.
    pub fn last_status(&self) -> Option<ObservedStatus> {
        self.last_status
    }

    /// Publish the inverse of the last known value as a SET-UNACK.
    ///
    /// Returns the value sent. Fails with [`Error::NotBound`] before any
    /// network activity when no application key is bound.
    pub fn trigger_local_change<T: Transport + ?Sized>(&mut self, transport: &T) -> Result<bool> {
        let value = !self.last_known;
        self.send_set(transport, self.config.publish_to, value, None, false)?;
        Ok(value)
    }

    /// Send a SET or SET-UNACK to `dst`. Returns the transaction id used.
    ///
    /// The transaction id is consumed once the binding check passes, even if
    /// the transport then fails.
    pub fn send_set<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        dst: Address,
        value: bool,
        timing: Option<Timing>,
        acknowledged: bool,
    ) -> Result<u8> {
        let app_idx = self.require_binding()?;

        let tid = self.next_tid;
        self.next_tid = self.next_tid.wrapping_add(1);

        let set = OnOffSet {
            value,
            tid,
            source: Some(self.config.address),
            timing,
        };
        let opcode = if acknowledged {
            Opcode::Set
        } else {
            Opcode::SetUnacknowledged
        };

        info!(
            dst = %dst,
            tid,
            value = on_off(value),
            src = %self.config.address,
            "Sending {}", opcode
        );

        transport
            .send(dst, app_idx, opcode.raw(), set.encode(self.config.layout))
            .map_err(|e| {
                warn!(tid, error = %e, "OnOff set not sent");
                Error::from(e)
            })?;

        self.last_known = value;
        Ok(tid)
    }

    /// Ask `dst` for its state.
    pub fn send_get<T: Transport + ?Sized>(&self, transport: &T, dst: Address) -> Result<()> {
        let app_idx = self.require_binding()?;
        debug!(dst = %dst, "Sending {}", Opcode::Get);
        transport.send(dst, app_idx, Opcode::Get.raw(), Bytes::new())?;
        Ok(())
    }

    /// Observe a STATUS report. Purely informational.
    pub fn handle_status(&mut self, ctx: &MessageContext, body: &[u8]) -> Result<ObservedStatus> {
        let status = OnOffStatus::decode(body, self.config.layout)?;
        let observed = ObservedStatus {
            source: status.source.unwrap_or(ctx.src),
            present: status.present,
            pending: status.pending,
        };
        info!("OnOff status: {}", observed);
        self.last_status = Some(observed);
        Ok(observed)
    }

    fn require_binding(&self) -> Result<u16> {
        self.binding.app_idx().ok_or_else(|| {
            warn!("The OnOff client must be bound to a key before sending");
            Error::NotBound
        })
    }
}
