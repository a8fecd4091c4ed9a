//! Dispatcher state and the transition algorithm

use epa_core::{Event, Signal};
use heapless::Vec;

use crate::transition::{enter, exit, path_below, push, superstate};
use crate::{Action, Hierarchy, Outcome, StateMachine, MAX_STATE_DEPTH};

/// Execution context of one hierarchical state machine.
///
/// Holds the current leaf state and the two scratch paths used while a
/// transition is in flight. `D` bounds the nesting depth.
pub struct Hsm<S, const D: usize = MAX_STATE_DEPTH> {
    state: S,
    started: bool,
    src: Vec<S, D>,
    dst: Vec<S, D>,
}

impl<S: Copy + Eq + core::fmt::Debug, const D: usize> Hsm<S, D> {
    /// A machine sitting in `top`, waiting for its first `INIT`
    pub const fn new(top: S) -> Self {
        Self {
            state: top,
            started: false,
            src: Vec::new(),
            dst: Vec::new(),
        }
    }

    /// Current leaf state
    pub fn state(&self) -> S {
        self.state
    }

    /// Whether the initial transition has run
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Forget the current configuration; the next `INIT` starts over
    pub fn reset<M: Hierarchy<State = S>>(&mut self) {
        self.state = M::TOP;
        self.started = false;
    }

    /// Whether the current leaf is `state` or nested inside it
    pub fn is_in<M, C>(&self, sm: &mut M, ctx: &C, state: S) -> bool
    where
        M: StateMachine<C, State = S>,
        C: ?Sized,
    {
        let mut current = Some(self.state);
        while let Some(s) = current {
            if s == state {
                return true;
            }
            current = superstate(sm, ctx, s);
        }
        false
    }

    /// Deliver one event.
    ///
    /// The event travels from the leaf towards the top until a state answers
    /// with something other than [`Action::Super`]. A transition exits up to
    /// the least common ancestor of source and target, enters down to the
    /// target and then follows nested initial transitions.
    pub fn dispatch<M, C>(&mut self, sm: &mut M, ctx: &C, event: &Event) -> Outcome
    where
        M: StateMachine<C, State = S>,
        C: ?Sized,
    {
        if !self.started {
            if event.signal() == Signal::INIT {
                self.start(sm, ctx, event);
                return Outcome::Transitioned;
            }
            log::warn!("{} delivered before INIT", event.signal());
            return Outcome::Ignored;
        }

        self.src.clear();
        let mut state = self.state;
        let action = loop {
            push(&mut self.src, state);
            match sm.handle(ctx, state, event) {
                Action::Super(parent) => state = parent,
                other => break other,
            }
        };

        match action {
            Action::Handled => Outcome::Handled,
            Action::Deferred => Outcome::Deferred,
            Action::Ignored | Action::Super(_) => Outcome::Ignored,
            Action::Tran(target) => {
                log::trace!("{}: {:?} -> {:?}", event.signal(), state, target);
                // Leave every state below the one that took the transition.
                let below = self.src.len().saturating_sub(1);
                for i in 0..below {
                    exit(sm, ctx, self.src[i]);
                }
                self.transition(sm, ctx, state, target);
                self.drill(sm, ctx, target);
                Outcome::Transitioned
            }
        }
    }

    fn start<M, C>(&mut self, sm: &mut M, ctx: &C, event: &Event)
    where
        M: StateMachine<C, State = S>,
        C: ?Sized,
    {
        self.started = true;
        match sm.handle(ctx, M::TOP, event) {
            Action::Tran(target) => {
                log::trace!("initial -> {:?}", target);
                path_below(sm, ctx, M::TOP, target, &mut self.dst);
                self.enter_dst(sm, ctx);
                self.drill(sm, ctx, target);
            }
            other => {
                debug_assert!(false, "top state answered INIT with {:?}", other);
                self.state = M::TOP;
            }
        }
    }

    /// Exit from `source` to the least common ancestor and enter down to
    /// `target`. Leaves `dst` empty.
    fn transition<M, C>(&mut self, sm: &mut M, ctx: &C, source: S, target: S)
    where
        M: StateMachine<C, State = S>,
        C: ?Sized,
    {
        self.dst.clear();

        if source == target {
            exit(sm, ctx, source);
            push(&mut self.dst, target);
            return self.enter_dst(sm, ctx);
        }

        let target_super = superstate(sm, ctx, target);
        if target_super == Some(source) {
            push(&mut self.dst, target);
            return self.enter_dst(sm, ctx);
        }

        let source_super = superstate(sm, ctx, source);
        if source_super.is_some() && source_super == target_super {
            exit(sm, ctx, source);
            push(&mut self.dst, target);
            return self.enter_dst(sm, ctx);
        }

        if source_super == Some(target) {
            exit(sm, ctx, source);
            return;
        }

        // Collect the target's ancestors below the top; stop early if the
        // source is one of them.
        push(&mut self.dst, target);
        let mut ancestor = target_super;
        while let Some(state) = ancestor {
            if state == source {
                return self.enter_dst(sm, ctx);
            }
            if state == M::TOP {
                break;
            }
            push(&mut self.dst, state);
            ancestor = superstate(sm, ctx, state);
        }

        // Climb from the source until a state on the target's path turns up.
        exit(sm, ctx, source);
        let mut ancestor = source_super;
        while let Some(state) = ancestor {
            if state == M::TOP {
                break;
            }
            if let Some(lca) = self.dst.iter().position(|&s| s == state) {
                self.dst.truncate(lca);
                break;
            }
            exit(sm, ctx, state);
            ancestor = superstate(sm, ctx, state);
        }
        self.enter_dst(sm, ctx);
    }

    /// Follow initial transitions from `state` (already entered) until a leaf
    fn drill<M, C>(&mut self, sm: &mut M, ctx: &C, mut state: S)
    where
        M: StateMachine<C, State = S>,
        C: ?Sized,
    {
        let init = Event::constant(Signal::INIT);
        while let Action::Tran(child) = sm.handle(ctx, state, &init) {
            log::trace!("init {:?} -> {:?}", state, child);
            path_below(sm, ctx, state, child, &mut self.dst);
            self.enter_dst(sm, ctx);
            state = child;
        }
        self.state = state;
    }

    /// Enter `dst` outermost first and clear it
    fn enter_dst<M, C>(&mut self, sm: &mut M, ctx: &C)
    where
        M: StateMachine<C, State = S>,
        C: ?Sized,
    {
        for i in (0..self.dst.len()).rev() {
            enter(sm, ctx, self.dst[i]);
        }
        self.dst.clear();
    }
}

impl<S: core::fmt::Debug, const D: usize> core::fmt::Debug for Hsm<S, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hsm")
            .field("state", &self.state)
            .field("started", &self.started)
            .finish()
    }
}
