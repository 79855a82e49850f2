//! Error types for meshlight-onoff.

use thiserror::Error;

use crate::message::Opcode;

/// Result type for meshlight-onoff operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while handling OnOff messages.
///
/// Duplicate and no-op SETs are not errors; they surface as
/// [`SetDisposition`](crate::server::SetDisposition) variants.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or wrongly sized message body. Dropped without reply.
    #[error("protocol violation in {opcode}: {reason}")]
    ProtocolViolation {
        opcode: Opcode,
        reason: &'static str,
    },

    /// Opcode outside the Generic OnOff model.
    #[error("unknown opcode 0x{0:04x}")]
    UnknownOpcode(u16),

    /// Send attempted before the model was bound to an application key.
    #[error("model is not bound to an application key")]
    NotBound,

    /// The transport reported a transmission failure. Not retried here.
    #[error("send failed: {0}")]
    SendFailure(String),
}

/// Failures a [`Transport`](crate::transport::Transport) may report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No application key is associated with the requested context.
    #[error("application key not bound")]
    NotBound,

    /// Underlying transmission failed.
    #[error("transmission failed: {0}")]
    SendError(String),
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotBound => Error::NotBound,
            TransportError::SendError(reason) => Error::SendFailure(reason),
        }
    }
}

impl Error {
    /// Whether this is the "not ready" condition an operator should see.
    #[must_use]
    pub fn is_not_bound(&self) -> bool {
        matches!(self, Error::NotBound)
    }
}
