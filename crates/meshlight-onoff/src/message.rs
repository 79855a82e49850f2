//! Generic OnOff message bodies.
//!
//! Two body layouts exist. [`PayloadLayout::TransactionOnly`] is the plain
//! model layout:
//!
//! ```text
//! GET      (empty)
//! SET      value:u8 tid:u8 [transition:u8 delay:u8]
//! STATUS   present:u8 [target:u8 remaining:u8]
//! ```
//!
//! [`PayloadLayout::EmbeddedSource`] carries the sender's own unicast address
//! (u16 little-endian) so receivers can recognise echoes of their own
//! broadcasts:
//!
//! ```text
//! SET      value:u8 tid:u8 src:u16 [transition:u8 delay:u8]
//! STATUS   present:u8 src:u16 [target:u8 remaining:u8]
//! ```

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::time::{self, ModelTime};

/// Generic OnOff opcodes (two-octet, big-endian on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Get,
    Set,
    SetUnacknowledged,
    Status,
}

impl Opcode {
    /// Raw two-octet value.
    pub const fn raw(self) -> u16 {
        match self {
            Self::Get => 0x8201,
            Self::Set => 0x8202,
            Self::SetUnacknowledged => 0x8203,
            Self::Status => 0x8204,
        }
    }

    /// Parse a raw opcode.
    pub fn from_raw(raw: u16) -> Result<Self> {
        match raw {
            0x8201 => Ok(Self::Get),
            0x8202 => Ok(Self::Set),
            0x8203 => Ok(Self::SetUnacknowledged),
            0x8204 => Ok(Self::Status),
            other => Err(Error::UnknownOpcode(other)),
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "OnOff Get"),
            Self::Set => write!(f, "OnOff Set"),
            Self::SetUnacknowledged => write!(f, "OnOff Set Unack"),
            Self::Status => write!(f, "OnOff Status"),
        }
    }
}

/// Which body layout a node speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadLayout {
    /// Sender address embedded in SET and STATUS bodies.
    #[default]
    EmbeddedSource,
    /// Plain layout; echo detection falls back to the transport source.
    TransactionOnly,
}

impl std::str::FromStr for PayloadLayout {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedded" | "embedded_source" | "embedded-source" => Ok(Self::EmbeddedSource),
            "transaction" | "transaction_only" | "transaction-only" => Ok(Self::TransactionOnly),
            other => Err(format!("unknown payload layout: {}", other)),
        }
    }
}

/// Optional timing of a SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// Ramp duration once the delay has elapsed.
    pub transition: ModelTime,
    /// Delay before anything visible happens (5 ms resolution on the wire).
    pub delay: Duration,
}

impl Timing {
    /// Timing with the given ramp and delay.
    pub fn new(transition: Duration, delay: Duration) -> Self {
        Self {
            transition: ModelTime::Finite(transition),
            delay,
        }
    }
}

/// SET / SET-UNACK body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnOffSet {
    pub value: bool,
    pub tid: u8,
    /// Sender's own address, present in the embedded layout.
    pub source: Option<Address>,
    pub timing: Option<Timing>,
}

/// Target half of a STATUS, present only while a transition is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTarget {
    pub target: bool,
    pub remaining: ModelTime,
}

/// STATUS body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnOffStatus {
    pub present: bool,
    /// Reporting server's address, present in the embedded layout.
    pub source: Option<Address>,
    pub pending: Option<PendingTarget>,
}

fn violation(opcode: Opcode, reason: &'static str) -> Error {
    Error::ProtocolViolation { opcode, reason }
}

fn read_bool(buf: &mut &[u8], opcode: Opcode) -> Result<bool> {
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(violation(opcode, "on/off value out of range")),
    }
}

fn source_len(layout: PayloadLayout) -> usize {
    match layout {
        PayloadLayout::EmbeddedSource => 2,
        PayloadLayout::TransactionOnly => 0,
    }
}

/// Validate a GET body.
pub fn decode_get(body: &[u8]) -> Result<()> {
    if !body.is_empty() {
        return Err(violation(Opcode::Get, "body must be empty"));
    }
    Ok(())
}

impl OnOffSet {
    /// Parse a SET / SET-UNACK body.
    pub fn decode(opcode: Opcode, body: &[u8], layout: PayloadLayout) -> Result<Self> {
        let base = 2 + source_len(layout);
        if body.len() != base && body.len() != base + 2 {
            return Err(violation(opcode, "unexpected body length"));
        }

        let mut buf = body;
        let value = read_bool(&mut buf, opcode)?;
        let tid = buf.get_u8();
        let source = match layout {
            PayloadLayout::EmbeddedSource => Some(Address(buf.get_u16_le())),
            PayloadLayout::TransactionOnly => None,
        };

        let timing = if buf.has_remaining() {
            let transition = time::decode(buf.get_u8());
            if transition.is_indefinite() {
                return Err(violation(opcode, "indefinite transition time"));
            }
            let delay = time::decode_delay(buf.get_u8());
            Some(Timing { transition, delay })
        } else {
            None
        };

        Ok(Self {
            value,
            tid,
            source,
            timing,
        })
    }

    /// Serialize into a body for `layout`.
    ///
    /// In the embedded layout a missing `source` is written as unassigned.
    pub fn encode(&self, layout: PayloadLayout) -> Bytes {
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u8(u8::from(self.value));
        buf.put_u8(self.tid);
        if layout == PayloadLayout::EmbeddedSource {
            buf.put_u16_le(self.source.unwrap_or(Address::UNASSIGNED).raw());
        }
        if let Some(timing) = self.timing {
            buf.put_u8(time::encode(timing.transition));
            buf.put_u8(time::encode_delay(timing.delay));
        }
        buf.freeze()
    }
}

impl OnOffStatus {
    /// Parse a STATUS body.
    pub fn decode(body: &[u8], layout: PayloadLayout) -> Result<Self> {
        let base = 1 + source_len(layout);
        if body.len() != base && body.len() != base + 2 {
            return Err(violation(Opcode::Status, "unexpected body length"));
        }

        let mut buf = body;
        let present = read_bool(&mut buf, Opcode::Status)?;
        let source = match layout {
            PayloadLayout::EmbeddedSource => Some(Address(buf.get_u16_le())),
            PayloadLayout::TransactionOnly => None,
        };

        let pending = if buf.has_remaining() {
            let target = read_bool(&mut buf, Opcode::Status)?;
            let remaining = time::decode(buf.get_u8());
            Some(PendingTarget { target, remaining })
        } else {
            None
        };

        Ok(Self {
            present,
            source,
            pending,
        })
    }

    /// Serialize into a body for `layout`.
    pub fn encode(&self, layout: PayloadLayout) -> Bytes {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(u8::from(self.present));
        if layout == PayloadLayout::EmbeddedSource {
            buf.put_u16_le(self.source.unwrap_or(Address::UNASSIGNED).raw());
        }
        if let Some(pending) = self.pending {
            buf.put_u8(u8::from(pending.target));
            buf.put_u8(time::encode(pending.remaining));
        }
        buf.freeze()
    }
}
