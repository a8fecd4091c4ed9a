//! First-fit block heap over one fixed arena.
//!
//! Every block starts with a 16-byte header stored in the arena itself:
//!
//! | offset | field                                   |
//! |--------|-----------------------------------------|
//! | 0      | payload size, MSB set while busy        |
//! | 4      | previous block in address order         |
//! | 8      | previous block in the free list         |
//! | 12     | next block in the free list             |
//!
//! The next block in address order is `offset + HEADER_SIZE + size`. A
//! zero-size busy sentinel closes the arena so coalescing never runs off the
//! end. Links are arena offsets, `NIL` marks the end of a list.

use epa_core::{BlockId, Bytes, EpaError, EpaResult, MemClass};

use crate::MemStats;

/// Bytes of bookkeeping in front of every block
pub const HEADER_SIZE: usize = 16;

/// Payload alignment and granularity
pub const ALIGN: usize = 8;

/// Smallest payload worth splitting off as a separate free block
const MIN_PAYLOAD: usize = ALIGN;

const NIL: u32 = u32::MAX;
const BUSY: u32 = 0x8000_0000;
const SIZE_MASK: u32 = !BUSY;

const F_SIZE: usize = 0;
const F_PHYS_PREV: usize = 4;
const F_FREE_PREV: usize = 8;
const F_FREE_NEXT: usize = 12;

const fn align_up(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

/// First-fit heap with coalescing on free
pub struct BlockHeap<'a> {
    arena: &'a mut [u8],
    free_head: u32,
    sentinel: u32,
    free_bytes: usize,
    stats: MemStats,
}

impl<'a> BlockHeap<'a> {
    /// Partition `arena` into a single free block bounded by the sentinel
    pub fn new(arena: &'a mut [u8]) -> EpaResult<Self> {
        let len = arena.len() & !(ALIGN - 1);
        if len < 2 * HEADER_SIZE + MIN_PAYLOAD || len > SIZE_MASK as usize {
            return Err(EpaError::InvalidArena(arena.len()));
        }

        let sentinel = (len - HEADER_SIZE) as u32;
        let first_size = sentinel - HEADER_SIZE as u32;

        let mut heap = Self {
            arena,
            free_head: 0,
            sentinel,
            free_bytes: first_size as usize,
            stats: MemStats::new(first_size as usize),
        };

        heap.set(0, F_SIZE, first_size);
        heap.set(0, F_PHYS_PREV, NIL);
        heap.set(0, F_FREE_PREV, NIL);
        heap.set(0, F_FREE_NEXT, NIL);

        heap.set(sentinel, F_SIZE, BUSY);
        heap.set(sentinel, F_PHYS_PREV, 0);
        heap.set(sentinel, F_FREE_PREV, NIL);
        heap.set(sentinel, F_FREE_NEXT, NIL);

        log::debug!("block heap ready: {} free", Bytes(first_size as usize));
        Ok(heap)
    }

    /// Allocation statistics
    pub fn stats(&self) -> MemStats {
        self.stats
    }

    /// Size of the largest block a single allocation can currently get
    pub fn largest_free(&self) -> usize {
        let mut best = 0;
        let mut at = self.free_head;
        while at != NIL {
            best = best.max(self.size(at) as usize);
            at = self.get(at, F_FREE_NEXT);
        }
        best
    }

    /// Number of blocks on the free list
    pub fn free_blocks(&self) -> usize {
        let mut count = 0;
        let mut at = self.free_head;
        while at != NIL {
            count += 1;
            at = self.get(at, F_FREE_NEXT);
        }
        count
    }

    fn get(&self, at: u32, field: usize) -> u32 {
        let i = at as usize + field;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.arena[i..i + 4]);
        u32::from_le_bytes(word)
    }

    fn set(&mut self, at: u32, field: usize, value: u32) {
        let i = at as usize + field;
        self.arena[i..i + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn size(&self, at: u32) -> u32 {
        self.get(at, F_SIZE) & SIZE_MASK
    }

    fn is_busy(&self, at: u32) -> bool {
        self.get(at, F_SIZE) & BUSY != 0
    }

    fn next_phys(&self, at: u32) -> u32 {
        at + HEADER_SIZE as u32 + self.size(at)
    }

    fn unlink_free(&mut self, at: u32) {
        let prev = self.get(at, F_FREE_PREV);
        let next = self.get(at, F_FREE_NEXT);
        if prev == NIL {
            self.free_head = next;
        } else {
            self.set(prev, F_FREE_NEXT, next);
        }
        if next != NIL {
            self.set(next, F_FREE_PREV, prev);
        }
    }

    fn push_free(&mut self, at: u32) {
        let head = self.free_head;
        self.set(at, F_FREE_PREV, NIL);
        self.set(at, F_FREE_NEXT, head);
        if head != NIL {
            self.set(head, F_FREE_PREV, at);
        }
        self.free_head = at;
    }

    /// Put `new` where `old` sits in the free list
    fn replace_free(&mut self, old: u32, new: u32) {
        let prev = self.get(old, F_FREE_PREV);
        let next = self.get(old, F_FREE_NEXT);
        self.set(new, F_FREE_PREV, prev);
        self.set(new, F_FREE_NEXT, next);
        if prev == NIL {
            self.free_head = new;
        } else {
            self.set(prev, F_FREE_NEXT, new);
        }
        if next != NIL {
            self.set(next, F_FREE_PREV, new);
        }
    }

    fn is_block(&self, at: u32) -> bool {
        at < self.sentinel && at as usize % ALIGN == 0
    }
}

impl MemClass for BlockHeap<'_> {
    fn alloc(&mut self, size: usize) -> Option<BlockId> {
        if size > self.free_bytes {
            self.stats.on_fail();
            return None;
        }
        let need = align_up(size.max(1));

        let mut at = self.free_head;
        while at != NIL && (self.size(at) as usize) < need {
            at = self.get(at, F_FREE_NEXT);
        }
        if at == NIL {
            self.stats.on_fail();
            return None;
        }

        let block_size = self.size(at) as usize;
        let remainder = block_size - need;
        if remainder < HEADER_SIZE + MIN_PAYLOAD {
            // Too small to stand alone; hand out the whole block.
            self.unlink_free(at);
            self.set(at, F_SIZE, block_size as u32 | BUSY);
            self.free_bytes -= block_size;
        } else {
            let split = at + (HEADER_SIZE + need) as u32;
            let next = self.next_phys(at);
            self.set(split, F_SIZE, (remainder - HEADER_SIZE) as u32);
            self.set(split, F_PHYS_PREV, at);
            self.set(next, F_PHYS_PREV, split);
            self.replace_free(at, split);
            self.set(at, F_SIZE, need as u32 | BUSY);
            self.free_bytes -= need + HEADER_SIZE;
        }

        self.stats.on_alloc(self.free_bytes);
        Some(BlockId::new(at))
    }

    fn free(&mut self, block: BlockId) {
        let mut at = block.offset();
        debug_assert!(self.is_block(at), "{block} is not a heap block");
        debug_assert!(self.is_busy(at), "{block} freed twice");
        if !self.is_block(at) || !self.is_busy(at) {
            return;
        }

        let size = self.size(at);
        self.set(at, F_SIZE, size);
        self.free_bytes += size as usize;

        let next = self.next_phys(at);
        if !self.is_busy(next) {
            self.unlink_free(next);
            let merged = size + HEADER_SIZE as u32 + self.size(next);
            self.set(at, F_SIZE, merged);
            let after = self.next_phys(at);
            self.set(after, F_PHYS_PREV, at);
            self.free_bytes += HEADER_SIZE;
        }

        let prev = self.get(at, F_PHYS_PREV);
        if prev != NIL && !self.is_busy(prev) {
            self.unlink_free(prev);
            let merged = self.size(prev) + HEADER_SIZE as u32 + self.size(at);
            self.set(prev, F_SIZE, merged);
            let after = self.next_phys(prev);
            self.set(after, F_PHYS_PREV, prev);
            self.free_bytes += HEADER_SIZE;
            at = prev;
        }

        self.push_free(at);
        self.stats.on_free(self.free_bytes);
    }

    fn block_size(&self, block: BlockId) -> usize {
        self.size(block.offset()) as usize
    }

    fn free_space(&self) -> usize {
        self.free_bytes
    }

    fn bytes(&self, block: BlockId) -> &[u8] {
        let start = block.offset() as usize + HEADER_SIZE;
        let end = start + self.block_size(block);
        &self.arena[start..end]
    }

    fn bytes_mut(&mut self, block: BlockId) -> &mut [u8] {
        let start = block.offset() as usize + HEADER_SIZE;
        let end = start + self.block_size(block);
        &mut self.arena[start..end]
    }
}
