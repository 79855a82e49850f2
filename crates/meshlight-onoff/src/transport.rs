//! Collaborator seams: the delivery subsystem and the physical output.

use bytes::Bytes;

use crate::address::{Address, AppKeyIndex};
use crate::error::TransportError;

/// Addressing of a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageContext {
    /// Transport-level source element.
    pub src: Address,
    /// Destination the message was sent to.
    pub dst: Address,
    /// Application key the message was protected with.
    pub app_idx: AppKeyIndex,
}

impl MessageContext {
    /// Context for replying to the sender of this message.
    pub fn reply_to(&self) -> Address {
        self.src
    }
}

/// A message handed up by the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub ctx: MessageContext,
    pub opcode: u16,
    pub body: Bytes,
}

/// Callback receiving every inbound message.
pub type ReceiveHandler = Box<dyn Fn(InboundMessage) + Send + Sync>;

/// Addressed, credentialed delivery of opaque message bodies.
///
/// Sends are fire-and-forget; retries, if any, belong to the implementation.
pub trait Transport: Send + Sync {
    /// Send `body` to `dst` under application key `app_idx`.
    ///
    /// Fails with [`TransportError::NotBound`] when `app_idx` is not a key
    /// this transport holds.
    fn send(
        &self,
        dst: Address,
        app_idx: AppKeyIndex,
        opcode: u16,
        body: Bytes,
    ) -> Result<(), TransportError>;

    /// Register the handler for inbound messages, replacing any previous one.
    fn on_receive(&self, handler: ReceiveHandler);
}

/// Boolean output driven by the server (an LED, a relay, ...).
///
/// Best-effort and infallible.
pub trait Actuator: Send {
    /// Drive the output to `on`.
    fn set(&mut self, on: bool);

    /// In-progress indication at the start of a ramp.
    fn transition_started(&mut self) {
        self.set(true);
    }
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn set(&mut self, on: bool) {
        (**self).set(on);
    }

    fn transition_started(&mut self) {
        (**self).transition_started();
    }
}
