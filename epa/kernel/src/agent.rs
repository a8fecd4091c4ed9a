//! Event processing agents.
//!
//! An agent couples one event queue with one hierarchical state machine and
//! runs at a unique priority. The kernel only sees agents through the
//! object-safe [`Runnable`] trait, so agents with different state machines
//! share one ready list.

use core::cell::RefCell;

use critical_section::Mutex;
use epa_core::{Event, MemClass, Priority};
use epa_hsm::{Hierarchy, Hsm, Outcome, StateMachine, MAX_STATE_DEPTH};

use crate::{EventQueue, Kernel, ReadySlot};

/// Expected value of [`Runnable::signature`]
pub const AGENT_SIGNATURE: u32 = 0x4550_4121;

/// Interrupt-safe home of an agent's queue
pub type QueueCell = Mutex<RefCell<Option<EventQueue>>>;

/// Where a deferred event goes back into the agent's own queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeferPolicy {
    /// Behind everything already queued
    #[default]
    Tail,
    /// In front of everything already queued
    Head,
}

/// What the kernel needs from an agent
pub trait Runnable<'a, M: MemClass> {
    fn priority(&self) -> Priority;

    /// Ready-bitmap coordinates of the priority
    fn slot(&self) -> ReadySlot {
        ReadySlot::of(self.priority())
    }

    /// Debug validation word; [`AGENT_SIGNATURE`] for a live agent
    fn signature(&self) -> u32;

    fn defer_policy(&self) -> DeferPolicy {
        DeferPolicy::Tail
    }

    fn queue(&self) -> &QueueCell;

    /// Run the state machine on one event
    fn dispatch(&self, kernel: &Kernel<'a, M>, event: &Event) -> Outcome;

    /// Return the state machine to its unstarted configuration
    fn reset(&self);
}

/// An agent running state machine `SM` with nesting depth up to `D`
pub struct Agent<SM: Hierarchy, const D: usize = MAX_STATE_DEPTH> {
    priority: Priority,
    #[cfg(feature = "ready-slot-cache")]
    slot: ReadySlot,
    signature: u32,
    defer: DeferPolicy,
    queue: QueueCell,
    hsm: RefCell<Hsm<SM::State, D>>,
    machine: RefCell<SM>,
}

impl<SM: Hierarchy, const D: usize> Agent<SM, D> {
    pub const fn new(priority: Priority, machine: SM) -> Self {
        Self {
            priority,
            #[cfg(feature = "ready-slot-cache")]
            slot: ReadySlot::of(priority),
            signature: AGENT_SIGNATURE,
            defer: DeferPolicy::Tail,
            queue: Mutex::new(RefCell::new(None)),
            hsm: RefCell::new(Hsm::new(SM::TOP)),
            machine: RefCell::new(machine),
        }
    }

    /// Choose where deferred events are re-queued
    pub fn with_defer_policy(mut self, policy: DeferPolicy) -> Self {
        self.defer = policy;
        self
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Current leaf state; `None` while the agent is dispatching
    pub fn state(&self) -> Option<SM::State> {
        self.hsm.try_borrow().ok().map(|hsm| hsm.state())
    }

    pub fn is_started(&self) -> bool {
        self.hsm.try_borrow().map_or(true, |hsm| hsm.is_started())
    }

    /// Inspect the state machine; `None` while the agent is dispatching
    pub fn with_machine<R>(&self, f: impl FnOnce(&SM) -> R) -> Option<R> {
        self.machine.try_borrow().ok().map(|sm| f(&sm))
    }

    /// Whether the current leaf is `state` or nested inside it
    pub fn is_in<C: ?Sized>(&self, ctx: &C, state: SM::State) -> bool
    where
        SM: StateMachine<C>,
    {
        match (self.hsm.try_borrow(), self.machine.try_borrow_mut()) {
            (Ok(hsm), Ok(mut sm)) => hsm.is_in(&mut *sm, ctx, state),
            _ => false,
        }
    }
}

impl<'a, M, SM, const D: usize> Runnable<'a, M> for Agent<SM, D>
where
    M: MemClass + 'a,
    SM: StateMachine<Kernel<'a, M>>,
{
    fn priority(&self) -> Priority {
        self.priority
    }

    #[cfg(feature = "ready-slot-cache")]
    fn slot(&self) -> ReadySlot {
        self.slot
    }

    fn signature(&self) -> u32 {
        self.signature
    }

    fn defer_policy(&self) -> DeferPolicy {
        self.defer
    }

    fn queue(&self) -> &QueueCell {
        &self.queue
    }

    fn dispatch(&self, kernel: &Kernel<'a, M>, event: &Event) -> Outcome {
        // Preemption only ever nests strictly higher priorities, so an agent
        // is never dispatched while it is already running.
        let (Ok(mut hsm), Ok(mut machine)) =
            (self.hsm.try_borrow_mut(), self.machine.try_borrow_mut())
        else {
            debug_assert!(false, "agent {} re-entered", self.priority);
            return Outcome::Ignored;
        };
        hsm.dispatch(&mut *machine, kernel, event)
    }

    fn reset(&self) {
        if let Ok(mut hsm) = self.hsm.try_borrow_mut() {
            hsm.reset::<SM>();
        }
    }
}
