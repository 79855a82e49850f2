//! Delayed, two-phase transition timer for one OnOff server.
//!
//! ```text
//!            schedule()                 fire (transition > 0)
//!   Idle ──────────────► Armed ─────────────────────────────► Transitioning
//!    ▲                     │                                      │
//!    │   fire (transition == 0): commit                           │
//!    └─────────────────────┴──────────────────────────────────────┘
//!                                   fire: commit
//! ```
//!
//! The scheduler owns no timer itself. Each arm is identified by a generation;
//! the runtime sleeps until [`TimerArm::deadline`] and reports back with the
//! generation it was given. A later [`schedule`](TransitionScheduler::schedule)
//! bumps the generation, so a fire for a superseded arm is recognised as stale.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

/// Logical state of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    /// Nothing in flight.
    Idle,
    /// Waiting out the initial delay.
    Armed,
    /// Ramp window running after the delay elapsed.
    Transitioning,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Armed => write!(f, "Armed"),
            Self::Transitioning => write!(f, "Transitioning"),
        }
    }
}

/// A one-shot timer request handed to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerArm {
    /// Identifies this arm; echoed back on fire.
    pub generation: u64,
    /// When the timer should fire.
    pub deadline: Instant,
}

/// What a timer fire resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fire {
    /// Delay elapsed, ramp started. Show the in-progress indication and
    /// re-arm for the ramp window.
    Intermediate(TimerArm),
    /// Transition complete; commit the target value.
    Commit(bool),
    /// The fire belongs to a cancelled arm or the scheduler is idle.
    Stale,
}

/// Per-server transition timer state machine.
#[derive(Debug)]
pub struct TransitionScheduler {
    state: SchedulerState,
    target: bool,
    transition: Duration,
    deadline: Option<Instant>,
    generation: u64,
}

impl Default for TransitionScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionScheduler {
    /// Create an idle scheduler.
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Idle,
            target: false,
            transition: Duration::ZERO,
            deadline: None,
            generation: 0,
        }
    }

    /// Arm a transition, replacing whatever was in flight.
    ///
    /// A zero `delay` fires on the runtime's next turn.
    pub fn schedule(
        &mut self,
        now: Instant,
        delay: Duration,
        transition: Duration,
        target: bool,
    ) -> TimerArm {
        if self.state != SchedulerState::Idle {
            debug!(
                state = %self.state,
                old_target = self.target,
                new_target = target,
                "replacing in-flight transition"
            );
        }

        self.generation = self.generation.wrapping_add(1);
        self.state = SchedulerState::Armed;
        self.target = target;
        self.transition = transition;

        let deadline = now + delay;
        self.deadline = Some(deadline);

        TimerArm {
            generation: self.generation,
            deadline,
        }
    }

    /// Handle a timer fire for `generation` at `now`.
    pub fn fire(&mut self, generation: u64, now: Instant) -> Fire {
        if generation != self.generation || self.state == SchedulerState::Idle {
            return Fire::Stale;
        }

        if self.state == SchedulerState::Armed && !self.transition.is_zero() {
            let ramp = std::mem::take(&mut self.transition);
            let deadline = now + ramp;
            self.generation = self.generation.wrapping_add(1);
            self.state = SchedulerState::Transitioning;
            self.deadline = Some(deadline);
            return Fire::Intermediate(TimerArm {
                generation: self.generation,
                deadline,
            });
        }

        self.state = SchedulerState::Idle;
        self.deadline = None;
        self.transition = Duration::ZERO;
        Fire::Commit(self.target)
    }

    /// Drop any in-flight transition.
    pub fn cancel(&mut self) {
        if self.state != SchedulerState::Idle {
            self.generation = self.generation.wrapping_add(1);
        }
        self.state = SchedulerState::Idle;
        self.deadline = None;
        self.transition = Duration::ZERO;
    }

    /// Current logical state.
    pub const fn state(&self) -> SchedulerState {
        self.state
    }

    /// Check if nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.state == SchedulerState::Idle
    }

    /// Pending target value while a transition is in flight.
    pub fn target(&self) -> Option<bool> {
        match self.state {
            SchedulerState::Idle => None,
            SchedulerState::Armed | SchedulerState::Transitioning => Some(self.target),
        }
    }

    /// Time left until the transition completes: time to the current
    /// deadline plus any ramp not yet started.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(now) + self.transition,
            None => Duration::ZERO,
        }
    }

    /// Ramp duration still stored (non-zero only while armed).
    pub fn stored_transition(&self) -> Duration {
        self.transition
    }

    /// Current arm, if a timer should be running.
    pub fn pending_arm(&self) -> Option<TimerArm> {
        self.deadline.map(|deadline| TimerArm {
            generation: self.generation,
            deadline,
        })
    }
}
