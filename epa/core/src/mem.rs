//! Memory class contract.
//!
//! A memory class hands out variable-size blocks of one arena. Blocks are
//! addressed by [`BlockId`] handles rather than raw pointers; the bytes are
//! reached through the class itself, which keeps the arena borrow in one
//! place. `&mut self` methods assume the caller already serialises access
//! (the `*_I` discipline); wrap a class in a critical-section mutex to share it.

use core::fmt;

/// Handle to a block inside a memory class arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u32);

impl BlockId {
    pub const fn new(offset: u32) -> Self {
        Self(offset)
    }

    /// Arena offset of the block
    pub const fn offset(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block@{:#x}", self.0)
    }
}

/// Allocator backing agents and events
pub trait MemClass {
    /// Allocate at least `size` bytes; `None` when exhausted
    fn alloc(&mut self, size: usize) -> Option<BlockId>;

    /// Return a block obtained from [`MemClass::alloc`]
    fn free(&mut self, block: BlockId);

    /// Usable size of a block, which may exceed the requested size
    fn block_size(&self, block: BlockId) -> usize;

    /// Total bytes currently available for allocation
    fn free_space(&self) -> usize;

    /// Payload bytes of a block
    fn bytes(&self, block: BlockId) -> &[u8];

    /// Mutable payload bytes of a block
    fn bytes_mut(&mut self, block: BlockId) -> &mut [u8];
}

impl<M: MemClass + ?Sized> MemClass for &mut M {
    fn alloc(&mut self, size: usize) -> Option<BlockId> {
        (**self).alloc(size)
    }

    fn free(&mut self, block: BlockId) {
        (**self).free(block)
    }

    fn block_size(&self, block: BlockId) -> usize {
        (**self).block_size(block)
    }

    fn free_space(&self) -> usize {
        (**self).free_space()
    }

    fn bytes(&self, block: BlockId) -> &[u8] {
        (**self).bytes(block)
    }

    fn bytes_mut(&mut self, block: BlockId) -> &mut [u8] {
        (**self).bytes_mut(block)
    }
}
