#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

//! # EPA Kernel
//!
//! Event processing agents and the schedulers that run them. An agent owns
//! an event queue and a hierarchical state machine; the kernel picks the
//! highest-priority agent with pending events and dispatches one event to it.
//!
//! - [`event`] – dynamic event lifecycle and reference counting
//! - [`queue`] – bounded FIFO/LIFO event queue
//! - [`ready`] – two-level ready bitmap
//! - [`agent`] – agents and the [`Runnable`] contract
//! - [`kernel`] – the kernel context, cooperative and preemptive policies
//!
//! Dynamic events and queue rings live in the kernel's memory class, so a
//! single arena sized at startup bounds everything the kernel allocates.

pub mod agent;
pub mod event;
pub mod kernel;
pub mod queue;
pub mod ready;

pub use agent::{Agent, DeferPolicy, QueueCell, Runnable, AGENT_SIGNATURE};
pub use event::{Header, EVENT_HEADER, MAX_PAYLOAD};
pub use kernel::{
    AgentRef, IsrGuard, Kernel, KernelConfig, KernelConfigBuilder, Policy, SchedStatus,
};
pub use queue::{EventQueue, QueueStats};
pub use ready::{ReadyQueue, ReadySlot};

pub use epa_core::*;
pub use epa_hsm::{Action, Hierarchy, Outcome, StateMachine, MAX_STATE_DEPTH};
pub use epa_mem::{BlockHeap, BlockPool, MemStats, SharedMem};


/// Default event queue capacity for agents
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;
