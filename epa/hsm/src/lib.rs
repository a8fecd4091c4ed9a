#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

//! # EPA Hierarchical State Machines
//!
//! Dispatcher for UML-style hierarchical state machines:
//! - entry and exit actions
//! - nested initial transitions
//! - transitions through the least common ancestor of source and target
//! - deferral of events back to the owning queue
//!
//! States are values of a closed enum. The user writes one
//! [`StateMachine::handle`] that matches on the state and the signal and
//! answers with an [`Action`]. The hierarchy is discovered at run time by
//! asking a state for its superstate, so no tables need to be declared.

use core::fmt;

use epa_core::Event;

pub mod hsm;
pub mod transition;

pub use hsm::Hsm;


/// Maximum nesting depth for hierarchical states
pub const MAX_STATE_DEPTH: usize = 8;

/// Answer of a state handler to one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<S> {
    /// Not handled here; try the given superstate
    Super(S),
    /// Transition to the given target state
    Tran(S),
    /// Consumed without changing state
    Handled,
    /// Put the event back on the owner's queue
    Deferred,
    /// Consumed and dropped; only the top state should answer this
    Ignored,
}

/// Result of one dispatch as seen by the owning agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    Ignored,
    Deferred,
    Transitioned,
}

/// The state set of a machine
pub trait Hierarchy {
    type State: Copy + Eq + fmt::Debug;

    /// Outermost state; answers [`Action::Ignored`] to everything but its
    /// initial transition
    const TOP: Self::State;
}

/// Behaviour of a machine, given a context `C` shared with its handlers
pub trait StateMachine<C: ?Sized = ()>: Hierarchy {
    fn handle(&mut self, ctx: &C, state: Self::State, event: &Event) -> Action<Self::State>;
}

#[cfg(feature = "defmt")]
impl defmt::Format for Outcome {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Outcome::Handled => defmt::write!(fmt, "Handled"),
            Outcome::Ignored => defmt::write!(fmt, "Ignored"),
            Outcome::Deferred => defmt::write!(fmt, "Deferred"),
            Outcome::Transitioned => defmt::write!(fmt, "Transitioned"),
        }
    }
}
