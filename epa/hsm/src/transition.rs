//! Transition primitives: reserved-signal triggers and path bookkeeping.

use epa_core::{Event, Signal};
use heapless::Vec;

use crate::{Action, StateMachine};

/// Send a reserved signal to one state
pub(crate) fn trigger<M, C>(sm: &mut M, ctx: &C, state: M::State, signal: Signal) -> Action<M::State>
where
    M: StateMachine<C>,
    C: ?Sized,
{
    sm.handle(ctx, state, &Event::constant(signal))
}

/// Superstate of `state`, or `None` for the top state
pub(crate) fn superstate<M, C>(sm: &mut M, ctx: &C, state: M::State) -> Option<M::State>
where
    M: StateMachine<C>,
    C: ?Sized,
{
    if state == M::TOP {
        return None;
    }
    match trigger(sm, ctx, state, Signal::SUPER) {
        Action::Super(parent) => Some(parent),
        _ => None,
    }
}

pub(crate) fn enter<M, C>(sm: &mut M, ctx: &C, state: M::State)
where
    M: StateMachine<C>,
    C: ?Sized,
{
    log::trace!("entry {:?}", state);
    trigger(sm, ctx, state, Signal::ENTRY);
}

pub(crate) fn exit<M, C>(sm: &mut M, ctx: &C, state: M::State)
where
    M: StateMachine<C>,
    C: ?Sized,
{
    log::trace!("exit {:?}", state);
    trigger(sm, ctx, state, Signal::EXIT);
}

/// Append to a scratch path; running out of room is a configuration error
pub(crate) fn push<S, const D: usize>(path: &mut Vec<S, D>, state: S) {
    let fits = path.push(state).is_ok();
    debug_assert!(fits, "state nesting deeper than {}", D);
}

/// Record the states strictly below `ancestor` down to `target` inclusive,
/// innermost first
pub(crate) fn path_below<M, C, const D: usize>(
    sm: &mut M,
    ctx: &C,
    ancestor: M::State,
    target: M::State,
    path: &mut Vec<M::State, D>,
) where
    M: StateMachine<C>,
    C: ?Sized,
{
    path.clear();
    let mut state = target;
    while state != ancestor {
        push(path, state);
        match superstate(sm, ctx, state) {
            Some(parent) => state = parent,
            None => {
                debug_assert!(false, "{:?} is not nested in {:?}", target, ancestor);
                break;
            }
        }
    }
}
