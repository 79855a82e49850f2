//! Meshlight OnOff - Generic OnOff state replication over a mesh
//!
//! Each node holds one boolean and exchanges GET / SET / SET-UNACK / STATUS
//! messages to query, change and report it, optionally with a delayed,
//! timed transition.
//!
//! # Overview
//!
//! - [`time`]: 8-bit (resolution, steps) encoding of transition times
//! - [`TransactionFilter`]: single-slot `(tid, source)` duplicate suppression
//! - [`TransitionScheduler`]: delay, then ramp, then commit
//! - [`StateServer`]: owns the authoritative value, answers GET and SET
//! - [`StateClient`]: publishes SET-UNACK on local triggers, observes STATUS
//!
//! The crate does no I/O. A runtime feeds inbound messages and timer fires in
//! one at a time and forwards what comes back to a [`Transport`].
//!
//! # Example
//!
//! ```rust
//! use meshlight_onoff::{Actuator, Address, MessageContext, OnOffSet, ServerConfig, StateServer};
//! use tokio::time::Instant;
//!
//! struct Led(bool);
//!
//! impl Actuator for Led {
//!     fn set(&mut self, on: bool) {
//!         self.0 = on;
//!     }
//! }
//!
//! let mut server = StateServer::new(ServerConfig::new(Address(0x0001)), Led(false));
//! let ctx = MessageContext { src: Address(0x0002), dst: Address::ALL_NODES, app_idx: 0 };
//! let set = OnOffSet { value: true, tid: 1, source: Some(Address(0x0002)), timing: None };
//!
//! let now = Instant::now();
//! let arm = server.handle_set_unacknowledged(&ctx, &set, now).arm.unwrap();
//! server.on_timer(arm.generation, arm.deadline);
//! assert!(server.value());
//! assert!(server.actuator().0);
//! ```

pub mod address;
pub mod client;
pub mod error;
pub mod message;
pub mod scheduler;
pub mod server;
pub mod time;
pub mod transaction;
pub mod transport;

pub use address::{Address, AppKeyIndex, Binding};
pub use client::{ClientConfig, ObservedStatus, StateClient};
pub use error::{Error, Result, TransportError};
pub use message::{OnOffSet, OnOffStatus, Opcode, PayloadLayout, PendingTarget, Timing};
pub use scheduler::{Fire, SchedulerState, TimerArm, TransitionScheduler};
pub use server::{OnOffState, ServerConfig, ServerOutput, SetDisposition, SetOutcome, StateServer};
pub use time::ModelTime;
pub use transaction::{Rejection, TransactionFilter, TransactionRecord};
pub use transport::{Actuator, InboundMessage, MessageContext, ReceiveHandler, Transport};
