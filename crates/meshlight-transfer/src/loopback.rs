//! In-process mesh for tests and single-host demos
//!
//! Every frame sent by any endpoint is delivered synchronously to every
//! endpoint whose identity accepts it, the sender included. A mesh may be
//! configured to deliver each frame several times, like a flooded network
//! relaying one message over multiple paths.

use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use meshlight_onoff::{Address, AppKeyIndex, ReceiveHandler, Transport, TransportError};

use crate::link::{LinkStats, LinkStatsSnapshot, MeshLink};
use crate::types::{Frame, Identity};

struct Port {
    identity: RwLock<Option<Identity>>,
    handler: Mutex<Option<Arc<ReceiveHandler>>>,
    stats: LinkStats,
}

/// Shared medium connecting [`LoopbackEndpoint`]s
pub struct LoopbackMesh {
    ports: Mutex<Vec<Arc<Port>>>,
    redundancy: usize,
    log: Mutex<Vec<Frame>>,
}

impl LoopbackMesh {
    /// Mesh delivering each frame once
    pub fn new() -> Arc<Self> {
        Self::with_redundancy(1)
    }

    /// Mesh delivering each frame `copies` times (at least once)
    pub fn with_redundancy(copies: usize) -> Arc<Self> {
        Arc::new(Self {
            ports: Mutex::new(Vec::new()),
            redundancy: copies.max(1),
            log: Mutex::new(Vec::new()),
        })
    }

    /// Attach a new endpoint, optionally already provisioned
    pub fn endpoint(self: &Arc<Self>, identity: Option<Identity>) -> LoopbackEndpoint {
        let port = Arc::new(Port {
            identity: RwLock::new(identity),
            handler: Mutex::new(None),
            stats: LinkStats::default(),
        });
        if let Ok(mut ports) = self.ports.lock() {
            ports.push(Arc::clone(&port));
        }
        LoopbackEndpoint {
            mesh: Arc::clone(self),
            port,
        }
    }

    /// Every frame sent so far, in order
    pub fn sent(&self) -> Vec<Frame> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn broadcast(&self, frame: Frame) {
        if let Ok(mut log) = self.log.lock() {
            log.push(frame.clone());
        }

        // Snapshot so handlers may send without deadlocking
        let ports: Vec<Arc<Port>> = match self.ports.lock() {
            Ok(p) => p.clone(),
            Err(_) => return,
        };

        for _ in 0..self.redundancy {
            for port in &ports {
                let accepted = port
                    .identity
                    .read()
                    .map(|id| id.as_ref().is_some_and(|id| frame.is_for(id)))
                    .unwrap_or(false);
                if !accepted {
                    port.stats.record_filtered();
                    continue;
                }
                port.stats.record_received();
                let handler = port.handler.lock().ok().and_then(|h| h.clone());
                if let Some(handler) = handler {
                    handler(frame.clone().into_inbound());
                }
            }
        }
    }
}

/// One node's attachment to a [`LoopbackMesh`]
#[derive(Clone)]
pub struct LoopbackEndpoint {
    mesh: Arc<LoopbackMesh>,
    port: Arc<Port>,
}

impl LoopbackEndpoint {
    /// Frame counters for this endpoint
    pub fn stats(&self) -> LinkStatsSnapshot {
        self.port.stats.snapshot()
    }
}

impl Transport for LoopbackEndpoint {
    fn send(
        &self,
        dst: Address,
        app_idx: AppKeyIndex,
        opcode: u16,
        body: Bytes,
    ) -> Result<(), TransportError> {
        let hdr = match self.port.identity.read() {
            Ok(id) => match id.as_ref() {
                Some(id) if id.holds(app_idx) => id.header(dst, app_idx, opcode),
                _ => return Err(TransportError::NotBound),
            },
            Err(_) => return Err(TransportError::SendError("identity lock poisoned".into())),
        };
        self.port.stats.record_sent();
        self.mesh.broadcast(Frame::new(hdr, body));
        Ok(())
    }

    fn on_receive(&self, handler: ReceiveHandler) {
        if let Ok(mut slot) = self.port.handler.lock() {
            *slot = Some(Arc::new(handler));
        }
    }
}

impl MeshLink for LoopbackEndpoint {
    fn set_identity(&self, identity: Identity) {
        if let Ok(mut slot) = self.port.identity.write() {
            *slot = Some(identity);
        }
    }

    fn identity(&self) -> Option<Identity> {
        self.port.identity.read().ok().and_then(|id| id.clone())
    }
}
