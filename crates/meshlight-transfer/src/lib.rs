//! Meshlight Transfer - frame transports for Meshlight nodes
//!
//! This crate provides:
//! - The 12-byte frame header (network, source, destination, key, opcode)
//! - A UDP transport with configurable buffers and a fixed peer list
//! - An in-process loopback mesh for tests and single-host demos
//!
//! Both transports implement [`meshlight_onoff::Transport`] plus
//! [`MeshLink`], so a node can install its identity once provisioned.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshlight_transfer::{UdpConfig, UdpTransport};
//!
//! let transport = UdpTransport::bind(UdpConfig {
//!     bind: "0.0.0.0:7300".parse()?,
//!     peers: vec!["255.255.255.255:7300".parse()?],
//!     ..Default::default()
//! })
//! .await?;
//! let _rx = transport.spawn_receiver();
//! ```

pub mod link;
pub mod loopback;
pub mod types;
pub mod udp;

pub use link::{LinkStats, LinkStatsSnapshot, MeshLink};
pub use loopback::{LoopbackEndpoint, LoopbackMesh};
pub use types::{Frame, FrameError, FrameHeader, Identity, NetworkId, HEADER_LEN, MAX_FRAME_LEN};
pub use udp::{UdpConfig, UdpTransport, DEFAULT_PORT};
