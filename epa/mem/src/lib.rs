#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

//! # EPA Memory
//!
//! Memory classes for agents, event queues and dynamic events. Both classes
//! work over a caller-provided byte arena and never touch a global allocator.
//!
//! - [`BlockHeap`] – first-fit variable-size blocks with coalescing
//! - [`BlockPool`] – fixed-size blocks, constant-time alloc and free
//! - [`SharedMem`] – critical-section wrapper for use from interrupts

pub mod heap;
pub mod pool;
pub mod shared;
pub mod stats;

pub use heap::{BlockHeap, ALIGN, HEADER_SIZE};
pub use pool::BlockPool;
pub use shared::SharedMem;
pub use stats::MemStats;

pub use epa_core::{BlockId, MemClass};
