#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

//! # EPA Core
//!
//! Core types and narrow external contracts for the EPA real-time kernel.
//! Everything the scheduler, the state machine dispatcher and the event
//! lifecycle share lives here:
//!
//! - [`events`] – signals, reference counts and event handles
//! - [`priorities`] – agent priorities and their ready-bitmap coordinates
//! - [`critical`] – scoped critical section guard
//! - [`bits`] – find-last-set / find-first-set bit scans
//! - [`mem`] – the memory class contract used by agents and events
//! - [`sink`] – fire-and-forget log channel
//! - [`time`] – tick counter used for event timestamps

use core::fmt;

pub mod bits;
pub mod critical;
pub mod events;
pub mod mem;
pub mod priorities;
pub mod sink;
pub mod time;

pub use bits::BitScan;
pub use critical::CriticalGuard;
pub use events::*;
pub use mem::{BlockId, MemClass};
pub use priorities::*;
pub use sink::{LogFacade, LogLevel, LogMsg, LogSink, NullSink};
pub use time::Tick;

/// Kernel version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type used throughout the kernel
pub type EpaResult<T> = Result<T, EpaError>;

/// Error types for kernel operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EpaError {
    /// Event queue is full; the event was dropped
    #[error("event queue is full")]
    QueueFull,
    /// Memory class could not satisfy an allocation
    #[error("out of memory (requested {0} bytes)")]
    OutOfMemory(usize),
    /// Priority outside `1..MAX_PRIORITIES`
    #[error("invalid priority {0}")]
    InvalidPriority(u8),
    /// Another agent already owns this priority slot
    #[error("priority {0} already registered")]
    PriorityInUse(u8),
    /// No agent registered at this priority
    #[error("no agent registered at priority {0}")]
    NotRegistered(u8),
    /// Size argument not representable by the allocator or the queue
    #[error("invalid size {0}")]
    InvalidSize(usize),
    /// Arena too small or too large to host a heap
    #[error("invalid arena of {0} bytes")]
    InvalidArena(usize),
    /// Agent signature word does not match
    #[error("agent signature mismatch")]
    BadSignature,
    /// Agent has no event queue yet
    #[error("agent at priority {0} has no event queue")]
    NoQueue(u8),
    /// Event already referenced by as many holders as its count can track
    #[error("event reference count exhausted")]
    RefCountExhausted,
}

#[cfg(feature = "defmt")]
impl defmt::Format for EpaError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            EpaError::QueueFull => defmt::write!(fmt, "QueueFull"),
            EpaError::OutOfMemory(n) => defmt::write!(fmt, "OutOfMemory({})", n),
            EpaError::InvalidPriority(p) => defmt::write!(fmt, "InvalidPriority({})", p),
            EpaError::PriorityInUse(p) => defmt::write!(fmt, "PriorityInUse({})", p),
            EpaError::NotRegistered(p) => defmt::write!(fmt, "NotRegistered({})", p),
            EpaError::InvalidSize(n) => defmt::write!(fmt, "InvalidSize({})", n),
            EpaError::InvalidArena(n) => defmt::write!(fmt, "InvalidArena({})", n),
            EpaError::BadSignature => defmt::write!(fmt, "BadSignature"),
            EpaError::NoQueue(p) => defmt::write!(fmt, "NoQueue({})", p),
            EpaError::RefCountExhausted => defmt::write!(fmt, "RefCountExhausted"),
        }
    }
}

/// Display helper that prints a byte count in a compact form
pub struct Bytes(pub usize);

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1024 && self.0 % 1024 == 0 {
            write!(f, "{}KiB", self.0 / 1024)
        } else {
            write!(f, "{}B", self.0)
        }
    }
}
