//! Frame format shared by the Meshlight transports
//!
//! Total header size: 12 bytes
//! - network_id: 4 bytes (derived from the network key)
//! - src: 2 bytes (u16 LE)
//! - dst: 2 bytes (u16 LE)
//! - app_idx: 2 bytes (u16 LE)
//! - opcode: 2 bytes (u16 BE, as mesh opcodes are written)

use bytes::{Buf, BufMut, Bytes, BytesMut};
use meshlight_onoff::{Address, AppKeyIndex, InboundMessage, MessageContext};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header length in bytes
pub const HEADER_LEN: usize = 12;

/// Largest frame we accept (header + access payload)
pub const MAX_FRAME_LEN: usize = 384;

/// Tag scoping frames to one mesh network
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkId(pub [u8; 4]);

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Frame decoding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("frame too long: {0} bytes")]
    TooLong(usize),
}

/// Frame header with addressing and credentials
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Network the frame belongs to
    pub network_id: NetworkId,
    /// Sending element
    pub src: Address,
    /// Destination (unicast or group)
    pub dst: Address,
    /// Application key index the body is scoped to
    pub app_idx: AppKeyIndex,
    /// Access layer opcode
    pub opcode: u16,
}

/// Complete frame with header and body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Frame header
    pub hdr: FrameHeader,
    /// Access payload
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(hdr: FrameHeader, body: Bytes) -> Self {
        Self { hdr, body }
    }

    /// Serialize header and body
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        buf.put_slice(&self.hdr.network_id.0);
        buf.put_u16_le(self.hdr.src.raw());
        buf.put_u16_le(self.hdr.dst.raw());
        buf.put_u16_le(self.hdr.app_idx);
        buf.put_u16(self.hdr.opcode);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Parse a received datagram
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::TooShort(data.len()));
        }
        if data.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLong(data.len()));
        }

        let mut buf = data;
        let mut network_id = [0u8; 4];
        buf.copy_to_slice(&mut network_id);
        let hdr = FrameHeader {
            network_id: NetworkId(network_id),
            src: Address(buf.get_u16_le()),
            dst: Address(buf.get_u16_le()),
            app_idx: buf.get_u16_le(),
            opcode: buf.get_u16(),
        };

        Ok(Self {
            hdr,
            body: Bytes::copy_from_slice(buf),
        })
    }

    /// Whether a node with `identity` should hand this frame up
    pub fn is_for(&self, identity: &Identity) -> bool {
        self.hdr.network_id == identity.network_id
            && identity.app_keys.contains(&self.hdr.app_idx)
            && self.hdr.dst.accepts(identity.address)
    }

    /// Convert into the message handed to the models
    pub fn into_inbound(self) -> InboundMessage {
        InboundMessage {
            ctx: MessageContext {
                src: self.hdr.src,
                dst: self.hdr.dst,
                app_idx: self.hdr.app_idx,
            },
            opcode: self.hdr.opcode,
            body: self.body,
        }
    }
}

/// Who a transport sends and receives as, set once provisioned
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Network scope
    pub network_id: NetworkId,
    /// Own unicast address
    pub address: Address,
    /// Application keys held
    pub app_keys: Vec<AppKeyIndex>,
}

impl Identity {
    /// Header for a frame from this identity
    pub fn header(&self, dst: Address, app_idx: AppKeyIndex, opcode: u16) -> FrameHeader {
        FrameHeader {
            network_id: self.network_id,
            src: self.address,
            dst,
            app_idx,
            opcode,
        }
    }

    /// Check if `app_idx` is a key this identity holds
    pub fn holds(&self, app_idx: AppKeyIndex) -> bool {
        self.app_keys.contains(&app_idx)
    }
}
