//! Generic OnOff server: owns the authoritative on/off state of one element.
//!
//! Inbound GET / SET / SET-UNACK bodies are parsed, filtered and turned into
//! scheduler arms and STATUS replies. The server never touches the network or
//! the clock itself: callers pass `now` and forward the returned
//! [`TimerArm`]s and reply bodies.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::message::{self, OnOffSet, OnOffStatus, Opcode, PayloadLayout, PendingTarget};
use crate::scheduler::{Fire, TimerArm, TransitionScheduler};
use crate::time::ModelTime;
use crate::transaction::{Rejection, TransactionFilter};
use crate::transport::{Actuator, MessageContext};

/// Configuration for a state server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// This element's own unicast address.
    pub address: Address,
    /// Body layout spoken on the wire.
    pub layout: PayloadLayout,
    /// Value at start (restored from persistence or `false`).
    pub initial_value: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: Address::UNASSIGNED,
            layout: PayloadLayout::default(),
            initial_value: false,
        }
    }
}

impl ServerConfig {
    /// Config for the element at `address`.
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

    /// Set the initial committed value.
    #[must_use]
    pub fn with_initial_value(mut self, value: bool) -> Self {
        self.initial_value = value;
        self
    }
}

/// Snapshot of the server's protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnOffState {
    pub value: bool,
    pub pending_tid: Option<u8>,
    pub pending_source: Option<Address>,
    pub transition_remaining: Duration,
}

/// How a SET was disposed of. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetDisposition {
    /// Admitted and scheduled.
    Applied,
    /// Retransmission of the last admitted transaction.
    Duplicate,
    /// Asked for the value we already have (or are heading to).
    NoOp,
    /// Echo of this node's own broadcast.
    SelfEcho,
}

impl From<Rejection> for SetDisposition {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::Duplicate => Self::Duplicate,
            Rejection::NoOp => Self::NoOp,
        }
    }
}

/// Result of handling a SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOutcome {
    pub disposition: SetDisposition,
    /// New timer arm to install, replacing any running one.
    pub arm: Option<TimerArm>,
    /// STATUS reply for acknowledged SETs.
    pub reply: Option<OnOffStatus>,
}

/// What the runtime has to do after a dispatched message.
#[derive(Debug, Clone, Default)]
pub struct ServerOutput {
    /// STATUS body to send back to the requester.
    pub reply: Option<Bytes>,
    /// Timer to (re)arm.
    pub arm: Option<TimerArm>,
    /// Disposition when the message was a SET.
    pub disposition: Option<SetDisposition>,
}

/// Generic OnOff server for one element.
pub struct StateServer<A> {
    config: ServerConfig,
    value: bool,
    filter: TransactionFilter,
    scheduler: TransitionScheduler,
    actuator: A,
}

impl<A: Actuator> StateServer<A> {
    /// Create a server driving `actuator`.
    pub fn new(config: ServerConfig, actuator: A) -> Self {
        debug!(
            address = %config.address,
            layout = ?config.layout,
            initial = config.initial_value,
            "Created OnOff server"
        );
        Self {
            value: config.initial_value,
            config,
            filter: TransactionFilter::new(),
            scheduler: TransitionScheduler::new(),
            actuator,
        }
    }

    /// Committed on/off value.
    pub fn value(&self) -> bool {
        self.value
    }

    /// Value the server is heading to: pending target, else committed value.
    pub fn effective_value(&self) -> bool {
        self.scheduler.target().unwrap_or(self.value)
    }

    /// This element's address.
    pub fn address(&self) -> Address {
        self.config.address
    }

    /// Wire layout in use.
    pub fn layout(&self) -> PayloadLayout {
        self.config.layout
    }

    /// The transition scheduler.
    pub fn scheduler(&self) -> &TransitionScheduler {
        &self.scheduler
    }

    /// The driven actuator.
    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Mutable access to the actuator (attention, tests).
    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }

    /// Snapshot of the protocol state at `now`.
    pub fn state(&self, now: Instant) -> OnOffState {
        let last = self.filter.last();
        OnOffState {
            value: self.value,
            pending_tid: last.map(|r| r.tid),
            pending_source: last.map(|r| r.src),
            transition_remaining: self.scheduler.remaining(now),
        }
    }

    /// Build the STATUS describing the server at `now`.
    ///
    /// Target and remaining time are included only while a transition is in
    /// flight. An admitted change whose timer is due but has not fired yet
    /// already reports the target as present.
    pub fn handle_get(&self, now: Instant) -> OnOffStatus {
        let remaining = self.scheduler.remaining(now);
        let (present, pending) = match self.scheduler.target() {
            Some(target) if remaining.is_zero() => (target, None),
            Some(target) => (
                self.value,
                Some(PendingTarget {
                    target,
                    remaining: ModelTime::Finite(remaining),
                }),
            ),
            None => (self.value, None),
        };

        OnOffStatus {
            present,
            source: self.source_field(),
            pending,
        }
    }

    /// Handle an acknowledged SET. Always yields a STATUS reply.
    pub fn handle_set(&mut self, ctx: &MessageContext, set: &OnOffSet, now: Instant) -> SetOutcome {
        let mut outcome = self.apply_set(ctx, set, now);
        outcome.reply = Some(self.handle_get(now));
        outcome
    }

    /// Handle a SET-UNACK. Same admission as [`handle_set`](Self::handle_set),
    /// no reply.
    pub fn handle_set_unacknowledged(
        &mut self,
        ctx: &MessageContext,
        set: &OnOffSet,
        now: Instant,
    ) -> SetOutcome {
        self.apply_set(ctx, set, now)
    }

    /// Parse and dispatch a raw server-side message.
    ///
    /// Malformed bodies come back as [`Error::ProtocolViolation`]; the caller
    /// drops them without reply.
    pub fn handle_message(
        &mut self,
        ctx: &MessageContext,
        opcode: Opcode,
        body: &[u8],
        now: Instant,
    ) -> Result<ServerOutput> {
        let layout = self.config.layout;
        match opcode {
            Opcode::Get => {
                message::decode_get(body)?;
                Ok(ServerOutput {
                    reply: Some(self.handle_get(now).encode(layout)),
                    ..Default::default()
                })
            }
            Opcode::Set => {
                let set = OnOffSet::decode(opcode, body, layout)?;
                let outcome = self.handle_set(ctx, &set, now);
                Ok(ServerOutput {
                    reply: outcome.reply.map(|status| status.encode(layout)),
                    arm: outcome.arm,
                    disposition: Some(outcome.disposition),
                })
            }
            Opcode::SetUnacknowledged => {
                let set = OnOffSet::decode(opcode, body, layout)?;
                let outcome = self.handle_set_unacknowledged(ctx, &set, now);
                Ok(ServerOutput {
                    reply: None,
                    arm: outcome.arm,
                    disposition: Some(outcome.disposition),
                })
            }
            Opcode::Status => Err(Error::ProtocolViolation {
                opcode,
                reason: "status is not a server message",
            }),
        }
    }

    /// Handle a timer fire. Returns the re-arm when a ramp just started.
    pub fn on_timer(&mut self, generation: u64, now: Instant) -> Option<TimerArm> {
        match self.scheduler.fire(generation, now) {
            Fire::Intermediate(arm) => {
                trace!(
                    ramp_ms = (arm.deadline - now).as_millis() as u64,
                    "transition ramp started"
                );
                self.actuator.transition_started();
                Some(arm)
            }
            Fire::Commit(target) => {
                self.value = target;
                self.actuator.set(target);
                info!(value = on_off(target), "OnOff state committed");
                None
            }
            Fire::Stale => {
                trace!(generation, "ignoring stale timer");
                None
            }
        }
    }

    fn apply_set(&mut self, ctx: &MessageContext, set: &OnOffSet, now: Instant) -> SetOutcome {
        if self.is_self_echo(ctx, set) {
            debug!(src = %ctx.src, tid = set.tid, "ignoring echo of own set");
            return SetOutcome {
                disposition: SetDisposition::SelfEcho,
                arm: None,
                reply: None,
            };
        }

        let current = self.effective_value();
        if let Err(rejection) = self.filter.admit(set.tid, ctx.src, set.value, current) {
            return SetOutcome {
                disposition: rejection.into(),
                arm: None,
                reply: None,
            };
        }

        let (transition, delay) = match set.timing {
            Some(timing) => (timing.transition.duration().unwrap_or_default(), timing.delay),
            None => (Duration::ZERO, Duration::ZERO),
        };

        info!(
            src = %ctx.src,
            tid = set.tid,
            value = on_off(set.value),
            delay_ms = delay.as_millis() as u64,
            transition_ms = transition.as_millis() as u64,
            "OnOff set admitted"
        );

        let arm = self.scheduler.schedule(now, delay, transition, set.value);
        SetOutcome {
            disposition: SetDisposition::Applied,
            arm: Some(arm),
            reply: None,
        }
    }

    fn is_self_echo(&self, ctx: &MessageContext, set: &OnOffSet) -> bool {
        let own = self.config.address;
        match self.config.layout {
            PayloadLayout::EmbeddedSource => set.source == Some(own),
            PayloadLayout::TransactionOnly => ctx.src == own,
        }
    }

    fn source_field(&self) -> Option<Address> {
        match self.config.layout {
            PayloadLayout::EmbeddedSource => Some(self.config.address),
            PayloadLayout::TransactionOnly => None,
        }
    }
}

/// Human-readable on/off.
pub(crate) fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Timing;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<bool>>>);

    impl Recorder {
        fn calls(&self) -> Vec<bool> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Actuator for Recorder {
        fn set(&mut self, on: bool) {
            self.0.lock().unwrap().push(on);
        }
    }

    const OWN: Address = Address(0x0001);
    const PEER: Address = Address(0x0002);

    fn ctx(src: Address) -> MessageContext {
        MessageContext {
            src,
            dst: Address::ALL_NODES,
            app_idx: 0,
        }
    }

    fn set(value: bool, tid: u8, source: Address) -> OnOffSet {
        OnOffSet {
            value,
            tid,
            source: Some(source),
            timing: None,
        }
    }

    fn server(layout: PayloadLayout) -> (StateServer<Recorder>, Recorder) {
        let recorder = Recorder::default();
        let server = StateServer::new(ServerConfig::new(OWN).with_layout(layout), recorder.clone());
        (server, recorder)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn idle_get_reports_value_only() {
        let (server, _) = server(PayloadLayout::TransactionOnly);
        let status = server.handle_get(Instant::now());
        assert!(!status.present);
        assert_eq!(status.pending, None);
        assert_eq!(status.source, None);
    }

    #[test]
    fn immediate_set_commits_on_fire() {
        let (mut server, recorder) = server(PayloadLayout::EmbeddedSource);
        let now = Instant::now();

        let outcome = server.handle_set_unacknowledged(&ctx(PEER), &set(true, 1, PEER), now);
        assert_eq!(outcome.disposition, SetDisposition::Applied);
        assert_eq!(outcome.reply, None);
        let arm = outcome.arm.unwrap();
        assert_eq!(arm.deadline, now);

        // nothing visible until the timer runs
        assert!(!server.value());
        assert!(recorder.calls().is_empty());

        assert_eq!(server.on_timer(arm.generation, now), None);
        assert!(server.value());
        assert_eq!(recorder.calls(), vec![true]);
    }

    #[test]
    fn duplicate_set_does_not_rearm() {
        let (mut server, _) = server(PayloadLayout::EmbeddedSource);
        let now = Instant::now();

        let first = server.handle_set_unacknowledged(&ctx(PEER), &set(true, 5, PEER), now);
        let arm = first.arm.unwrap();
        server.on_timer(arm.generation, now);

        let again = server.handle_set_unacknowledged(&ctx(PEER), &set(false, 5, PEER), now);
        assert_eq!(again.disposition, SetDisposition::Duplicate);
        assert_eq!(again.arm, None);
        assert!(server.value());
        assert!(server.scheduler().is_idle());
    }

    #[test]
    fn same_value_with_new_tid_is_noop() {
        let (mut server, recorder) = server(PayloadLayout::EmbeddedSource);
        let outcome =
            server.handle_set_unacknowledged(&ctx(PEER), &set(false, 9, PEER), Instant::now());
        assert_eq!(outcome.disposition, SetDisposition::NoOp);
        assert_eq!(outcome.arm, None);
        assert!(server.scheduler().is_idle());
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn embedded_self_echo_is_ignored() {
        let (mut server, recorder) = server(PayloadLayout::EmbeddedSource);
        let now = Instant::now();
        // transport source differs, embedded source is ours
        for tid in 0..4 {
            let echo = set(tid % 2 == 0, tid, OWN);
            let outcome = server.handle_set_unacknowledged(&ctx(PEER), &echo, now);
            assert_eq!(outcome.disposition, SetDisposition::SelfEcho);
            assert_eq!(outcome.arm, None);
        }
        assert!(!server.value());
        assert!(recorder.calls().is_empty());
        assert_eq!(server.state(now).pending_tid, None);
    }

    #[test]
    fn transaction_only_echo_uses_transport_source() {
        let (mut server, _) = server(PayloadLayout::TransactionOnly);
        let plain = OnOffSet {
            value: true,
            tid: 1,
            source: None,
            timing: None,
        };
        let outcome = server.handle_set_unacknowledged(&ctx(OWN), &plain, Instant::now());
        assert_eq!(outcome.disposition, SetDisposition::SelfEcho);

        let outcome = server.handle_set_unacknowledged(&ctx(PEER), &plain, Instant::now());
        assert_eq!(outcome.disposition, SetDisposition::Applied);
    }

    #[test]
    fn acknowledged_set_always_replies() {
        let (mut server, _) = server(PayloadLayout::EmbeddedSource);
        let now = Instant::now();

        let applied = server.handle_set(&ctx(PEER), &set(true, 1, PEER), now);
        assert!(applied.reply.is_some());

        let duplicate = server.handle_set(&ctx(PEER), &set(true, 1, PEER), now);
        assert_eq!(duplicate.disposition, SetDisposition::Duplicate);
        let reply = duplicate.reply.unwrap();
        assert_eq!(reply.source, Some(OWN));
        assert!(reply.present);
    }

    #[test]
    fn immediate_acknowledged_set_reports_new_value() {
        let (mut server, recorder) = server(PayloadLayout::EmbeddedSource);
        let now = Instant::now();

        let outcome = server.handle_set(&ctx(PEER), &set(true, 1, PEER), now);
        assert_eq!(outcome.disposition, SetDisposition::Applied);
        let reply = outcome.reply.unwrap();
        assert!(reply.present);
        assert_eq!(reply.pending, None);

        // a GET before the zero-delay timer runs agrees
        let status = server.handle_get(now);
        assert!(status.present);
        assert_eq!(status.pending, None);
        assert!(recorder.calls().is_empty());

        let arm = outcome.arm.unwrap();
        server.on_timer(arm.generation, now);
        assert!(server.handle_get(now).present);
        assert_eq!(recorder.calls(), vec![true]);
    }

    #[test]
    fn get_mid_transition_reports_target_and_remaining() {
        let (mut server, _) = server(PayloadLayout::TransactionOnly);
        let t0 = Instant::now();
        let mut with_timing = set(true, 1, PEER);
        with_timing.timing = Some(Timing::new(ms(200), ms(100)));

        let arm = server
            .handle_set_unacknowledged(&ctx(PEER), &with_timing, t0)
            .arm
            .unwrap();
        let ramp = server.on_timer(arm.generation, t0 + ms(100)).unwrap();

        let status = server.handle_get(t0 + ms(150));
        assert!(!status.present);
        let pending = status.pending.unwrap();
        assert!(pending.target);
        assert_eq!(pending.remaining, ModelTime::Finite(ms(150)));
        // encoded on the wire as 2 steps of 100 ms
        assert_eq!(&status.encode(PayloadLayout::TransactionOnly)[..], &[0, 1, 0x02]);

        server.on_timer(ramp.generation, t0 + ms(300));
        assert!(server.value());
        assert_eq!(server.handle_get(t0 + ms(300)).pending, None);
    }

    #[test]
    fn delayed_ramp_drives_actuator_twice() {
        let (mut server, recorder) = server(PayloadLayout::EmbeddedSource);
        let t0 = Instant::now();
        let mut with_timing = set(true, 1, PEER);
        with_timing.timing = Some(Timing::new(ms(200), ms(100)));

        let arm = server
            .handle_set_unacknowledged(&ctx(PEER), &with_timing, t0)
            .arm
            .unwrap();
        assert_eq!(arm.deadline, t0 + ms(100));

        let ramp = server.on_timer(arm.generation, t0 + ms(100)).unwrap();
        assert_eq!(ramp.deadline, t0 + ms(300));
        assert_eq!(recorder.calls(), vec![true]);
        assert!(!server.value());

        assert_eq!(server.on_timer(ramp.generation, t0 + ms(300)), None);
        assert!(server.value());
        assert_eq!(recorder.calls(), vec![true, true]);
    }

    #[test]
    fn set_back_to_committed_value_replaces_pending_transition() {
        let (mut server, recorder) = server(PayloadLayout::EmbeddedSource);
        let now = Instant::now();
        let mut slow = set(true, 1, PEER);
        slow.timing = Some(Timing::new(ms(1_000), Duration::ZERO));
        let first = server.handle_set_unacknowledged(&ctx(PEER), &slow, now).arm.unwrap();

        // heading to on; asking for on again is a no-op
        let same = server.handle_set_unacknowledged(&ctx(PEER), &set(true, 2, PEER), now);
        assert_eq!(same.disposition, SetDisposition::NoOp);

        // asking for off cancels the pending on
        let back = server.handle_set_unacknowledged(&ctx(PEER), &set(false, 3, PEER), now);
        assert_eq!(back.disposition, SetDisposition::Applied);
        let arm = back.arm.unwrap();

        assert_eq!(server.on_timer(first.generation, now), None);
        assert!(recorder.calls().is_empty());
        server.on_timer(arm.generation, now);
        assert!(!server.value());
        assert_eq!(recorder.calls(), vec![false]);
    }

    #[test]
    fn dispatch_drops_malformed_bodies() {
        let (mut server, _) = server(PayloadLayout::EmbeddedSource);
        let now = Instant::now();
        let err = server
            .handle_message(&ctx(PEER), Opcode::Set, &[1, 1], now)
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
        assert!(server.handle_message(&ctx(PEER), Opcode::Get, &[0], now).is_err());
        assert!(server.handle_message(&ctx(PEER), Opcode::Status, &[0, 0, 0], now).is_err());
    }

    #[test]
    fn dispatch_get_and_set() {
        let (mut server, _) = server(PayloadLayout::EmbeddedSource);
        let now = Instant::now();

        let get = server.handle_message(&ctx(PEER), Opcode::Get, &[], now).unwrap();
        assert_eq!(get.reply.as_deref(), Some(&[0u8, 0x01, 0x00][..]));
        assert_eq!(get.arm, None);

        let body = set(true, 1, PEER).encode(PayloadLayout::EmbeddedSource);
        let unack = server
            .handle_message(&ctx(PEER), Opcode::SetUnacknowledged, &body, now)
            .unwrap();
        assert_eq!(unack.reply, None);
        assert_eq!(unack.disposition, Some(SetDisposition::Applied));
        assert!(unack.arm.is_some());
    }
}
