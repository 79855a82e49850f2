//! UDP transport carrying mesh frames between nodes
//!
//! Provides a thin wrapper around tokio's UdpSocket with:
//! - Configurable send/receive buffer sizes
//! - Fan-out of every frame to a fixed peer list (unicast or broadcast)
//! - Identity-based filtering of inbound frames

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use meshlight_onoff::{Address, AppKeyIndex, ReceiveHandler, Transport, TransportError};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::link::{LinkStats, LinkStatsSnapshot, MeshLink};
use crate::types::{Frame, Identity, MAX_FRAME_LEN};

/// Default mesh port
pub const DEFAULT_PORT: u16 = 7300;

/// First pause after a failed receive
const RECV_BACKOFF_MIN: Duration = Duration::from_millis(10);
/// Longest pause between receive attempts while errors persist
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Doubling delay between failed receives, reset by a successful one.
#[derive(Debug)]
struct Backoff {
    next: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            next: RECV_BACKOFF_MIN,
        }
    }

    fn failure(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(RECV_BACKOFF_MAX);
        delay
    }

    fn success(&mut self) {
        self.next = RECV_BACKOFF_MIN;
    }
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Address to bind to
    pub bind: SocketAddr,
    /// Where every outgoing frame is sent
    pub peers: Vec<SocketAddr>,
    /// Send buffer size in bytes
    pub sndbuf: usize,
    /// Receive buffer size in bytes
    pub rcvbuf: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            peers: vec![SocketAddr::from(([255, 255, 255, 255], DEFAULT_PORT))],
            sndbuf: 256 * 1024,
            rcvbuf: 256 * 1024,
        }
    }
}

type SharedHandler = Arc<ReceiveHandler>;

/// Mesh transport over a single UDP socket
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    peers: Vec<SocketAddr>,
    identity: RwLock<Option<Identity>>,
    handler: Mutex<Option<SharedHandler>>,
    stats: LinkStats,
}

impl UdpTransport {
    /// Bind with the configured buffer sizes
    pub async fn bind(cfg: UdpConfig) -> anyhow::Result<Arc<Self>> {
        let domain = if cfg.bind.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

        // Set buffer sizes before binding
        socket.set_send_buffer_size(cfg.sndbuf)?;
        socket.set_recv_buffer_size(cfg.rcvbuf)?;
        socket.set_reuse_address(true)?;
        if cfg.bind.is_ipv4() {
            socket.set_broadcast(true)?;
        }

        socket.bind(&cfg.bind.into())?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;

        tracing::info!(
            "UDP mesh transport bound to {} ({} peers, sndbuf={}, rcvbuf={})",
            socket.local_addr()?,
            cfg.peers.len(),
            cfg.sndbuf,
            cfg.rcvbuf
        );

        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            peers: cfg.peers,
            identity: RwLock::new(None),
            handler: Mutex::new(None),
            stats: LinkStats::default(),
        }))
    }

    /// Get the local address this transport is bound to
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Frame counters
    pub fn stats(&self) -> LinkStatsSnapshot {
        self.stats.snapshot()
    }

    /// Start the receive loop. Frames that are malformed, for another
    /// network, under an unheld key or for another address are dropped.
    pub fn spawn_receiver(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_FRAME_LEN + 1];
            let mut backoff = Backoff::new();
            loop {
                let (len, from) = match this.socket.recv_from(&mut buf).await {
                    Ok(r) => r,
                    Err(e) => {
                        let delay = backoff.failure();
                        tracing::warn!(?delay, "UDP receive failed: {}", e);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                };
                backoff.success();
                this.deliver(&buf[..len], from);
            }
        })
    }

    fn deliver(&self, data: &[u8], from: SocketAddr) {
        let frame = match Frame::decode(data) {
            Ok(f) => f,
            Err(e) => {
                self.stats.record_malformed();
                tracing::debug!(%from, "dropping datagram: {}", e);
                return;
            }
        };

        let accepted = self
            .identity
            .read()
            .map(|id| id.as_ref().is_some_and(|id| frame.is_for(id)))
            .unwrap_or(false);
        if !accepted {
            self.stats.record_filtered();
            tracing::trace!(%from, src = %frame.hdr.src, dst = %frame.hdr.dst, "frame not for us");
            return;
        }

        self.stats.record_received();
        let handler = self.handler.lock().ok().and_then(|h| h.clone());
        if let Some(handler) = handler {
            handler(frame.into_inbound());
        }
    }
}

impl Transport for UdpTransport {
    fn send(
        &self,
        dst: Address,
        app_idx: AppKeyIndex,
        opcode: u16,
        body: Bytes,
    ) -> Result<(), TransportError> {
        let hdr = match self.identity.read() {
            Ok(id) => match id.as_ref() {
                Some(id) if id.holds(app_idx) => id.header(dst, app_idx, opcode),
                _ => return Err(TransportError::NotBound),
            },
            Err(_) => return Err(TransportError::SendError("identity lock poisoned".into())),
        };

        // Every peer gets its copy even when an earlier one fails
        let wire = Frame::new(hdr, body).encode();
        let failures: Vec<String> = self
            .peers
            .iter()
            .filter_map(|peer| match self.socket.try_send_to(&wire, *peer) {
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!(%peer, "send failed: {}", e);
                    Some(format!("{}: {}", peer, e))
                }
            })
            .collect();

        if failures.len() < self.peers.len() {
            self.stats.record_sent();
            tracing::trace!(%dst, opcode, "frame sent");
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TransportError::SendError(failures.join("; ")))
        }
    }

    fn on_receive(&self, handler: ReceiveHandler) {
        if let Ok(mut slot) = self.handler.lock() {
            *slot = Some(Arc::new(handler));
        }
    }
}

impl MeshLink for UdpTransport {
    fn set_identity(&self, identity: Identity) {
        if let Ok(mut slot) = self.identity.write() {
            *slot = Some(identity);
        }
    }

    fn identity(&self) -> Option<Identity> {
        self.identity.read().ok().and_then(|id| id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NetworkId;
    use meshlight_onoff::InboundMessage;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn local_config() -> UdpConfig {
        UdpConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            peers: Vec::new(),
            ..Default::default()
        }
    }

    fn identity(address: u16) -> Identity {
        Identity {
            network_id: NetworkId([7, 7, 7, 7]),
            address: Address(address),
            app_keys: vec![0],
        }
    }

    #[tokio::test]
    async fn test_transport_creation() {
        let transport = UdpTransport::bind(local_config()).await.unwrap();
        let addr = transport.local_addr().unwrap();
        assert!(addr.port() > 0);
        assert!(transport.identity().is_none());
    }

    #[tokio::test]
    async fn test_send_requires_identity_and_key() {
        let transport = UdpTransport::bind(local_config()).await.unwrap();
        let err = transport
            .send(Address::ALL_NODES, 0, 0x8201, Bytes::new())
            .unwrap_err();
        assert_eq!(err, TransportError::NotBound);

        transport.set_identity(identity(0x0001));
        let err = transport
            .send(Address::ALL_NODES, 3, 0x8201, Bytes::new())
            .unwrap_err();
        assert_eq!(err, TransportError::NotBound);
        assert_eq!(transport.stats().sent, 0);
    }

    #[tokio::test]
    async fn test_frames_reach_peer_handler() {
        let rx_side = UdpTransport::bind(local_config()).await.unwrap();
        rx_side.set_identity(identity(0x0002));
        let (tx, mut inbound) = mpsc::unbounded_channel::<InboundMessage>();
        rx_side.on_receive(Box::new(move |msg| {
            let _ = tx.send(msg);
        }));
        let _recv = rx_side.spawn_receiver();

        let tx_side = UdpTransport::bind(UdpConfig {
            peers: vec![rx_side.local_addr().unwrap()],
            ..local_config()
        })
        .await
        .unwrap();
        tx_side.set_identity(identity(0x0001));

        // Unicast to someone else is filtered, group traffic passes
        tx_side
            .send(Address(0x0003), 0, 0x8201, Bytes::new())
            .unwrap();
        tx_side
            .send(Address::ALL_NODES, 0, 0x8203, Bytes::from_static(&[1, 4]))
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.ctx.src, Address(0x0001));
        assert_eq!(msg.opcode, 0x8203);
        assert_eq!(&msg.body[..], &[1, 4]);

        let stats = rx_side.stats();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.filtered, 1);
        assert_eq!(tx_side.stats().sent, 2);
    }

    #[tokio::test]
    async fn test_failing_peer_does_not_block_the_rest() {
        let rx_side = UdpTransport::bind(local_config()).await.unwrap();
        rx_side.set_identity(identity(0x0002));
        let (tx, mut inbound) = mpsc::unbounded_channel::<InboundMessage>();
        rx_side.on_receive(Box::new(move |msg| {
            let _ = tx.send(msg);
        }));
        let _recv = rx_side.spawn_receiver();

        // An IPv6 peer is unreachable from an IPv4 socket
        let unreachable: SocketAddr = "[::1]:7300".parse().unwrap();
        let tx_side = UdpTransport::bind(UdpConfig {
            peers: vec![unreachable, rx_side.local_addr().unwrap()],
            ..local_config()
        })
        .await
        .unwrap();
        tx_side.set_identity(identity(0x0001));

        let err = tx_side
            .send(Address::ALL_NODES, 0, 0x8203, Bytes::from_static(&[1, 4]))
            .unwrap_err();
        match err {
            TransportError::SendError(msg) => assert!(msg.contains("[::1]:7300"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }

        let msg = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.opcode, 0x8203);
        assert_eq!(tx_side.stats().sent, 1);
    }

    #[test]
    fn test_receive_backoff_grows_and_resets() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.failure(), RECV_BACKOFF_MIN);
        assert_eq!(backoff.failure(), RECV_BACKOFF_MIN * 2);
        for _ in 0..16 {
            backoff.failure();
        }
        assert_eq!(backoff.failure(), RECV_BACKOFF_MAX);

        backoff.success();
        assert_eq!(backoff.failure(), RECV_BACKOFF_MIN);
    }

    #[tokio::test]
    async fn test_malformed_datagrams_counted() {
        let transport = UdpTransport::bind(local_config()).await.unwrap();
        transport.set_identity(identity(0x0002));
        transport.deliver(&[1, 2, 3], "127.0.0.1:1".parse().unwrap());
        assert_eq!(transport.stats().malformed, 1);
    }
}
