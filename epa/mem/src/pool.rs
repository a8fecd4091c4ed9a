//! Fixed-size block pool.
//!
//! Every block has the same size, so allocation is a pop from an intrusive
//! free list and release is a push. A free block holds its link in the first
//! four bytes and [`FREE_TAG`] in the next four; `alloc` clears the tag.

use epa_core::{BlockId, EpaError, EpaResult, MemClass};

use crate::{heap::ALIGN, MemStats};

const NIL: u32 = u32::MAX;

/// Marker word stored in every block sitting on the free list
const FREE_TAG: u32 = 0xF7EE_B10C;

/// Pool of equally sized blocks carved from one arena
pub struct BlockPool<'a> {
    arena: &'a mut [u8],
    block_size: usize,
    blocks: usize,
    free_head: u32,
    free_count: usize,
    stats: MemStats,
}

impl<'a> BlockPool<'a> {
    /// Carve `arena` into as many `block_size` blocks as fit
    pub fn new(arena: &'a mut [u8], block_size: usize) -> EpaResult<Self> {
        if block_size == 0 || block_size > u32::MAX as usize / 2 {
            return Err(EpaError::InvalidSize(block_size));
        }
        let block_size = (block_size + ALIGN - 1) & !(ALIGN - 1);
        let blocks = arena.len() / block_size;
        if blocks == 0 || arena.len() > NIL as usize {
            return Err(EpaError::InvalidArena(arena.len()));
        }

        let mut pool = Self {
            arena,
            block_size,
            blocks,
            free_head: NIL,
            free_count: 0,
            stats: MemStats::new(blocks * block_size),
        };
        for index in (0..blocks).rev() {
            pool.push((index * block_size) as u32);
        }

        log::debug!("block pool ready: {} x {}B", blocks, block_size);
        Ok(pool)
    }

    /// Number of blocks in the pool
    pub fn capacity(&self) -> usize {
        self.blocks
    }

    /// Blocks currently available
    pub fn free_blocks(&self) -> usize {
        self.free_count
    }

    pub fn stats(&self) -> MemStats {
        self.stats
    }

    fn word(&self, at: usize) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.arena[at..at + 4]);
        u32::from_le_bytes(word)
    }

    fn set_word(&mut self, at: usize, value: u32) {
        self.arena[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn link(&self, at: u32) -> u32 {
        self.word(at as usize)
    }

    /// Whether `at` is on the free list. The tag rules out busy blocks
    /// cheaply; a payload that happens to carry it falls back to a walk.
    fn is_free(&self, at: u32) -> bool {
        if self.word(at as usize + 4) != FREE_TAG {
            return false;
        }
        let mut cursor = self.free_head;
        while cursor != NIL {
            if cursor == at {
                return true;
            }
            cursor = self.link(cursor);
        }
        false
    }

    fn push(&mut self, at: u32) {
        let i = at as usize;
        let head = self.free_head;
        self.set_word(i, head);
        self.set_word(i + 4, FREE_TAG);
        self.free_head = at;
        self.free_count += 1;
    }
}

impl MemClass for BlockPool<'_> {
    fn alloc(&mut self, size: usize) -> Option<BlockId> {
        if size > self.block_size || self.free_head == NIL {
            self.stats.on_fail();
            return None;
        }
        let at = self.free_head;
        self.free_head = self.link(at);
        self.set_word(at as usize + 4, 0);
        self.free_count -= 1;
        self.stats.on_alloc(self.free_space());
        Some(BlockId::new(at))
    }

    fn free(&mut self, block: BlockId) {
        let at = block.offset() as usize;
        debug_assert!(
            at % self.block_size == 0 && at < self.blocks * self.block_size,
            "{block} is not a pool block"
        );
        if at % self.block_size != 0 || at >= self.blocks * self.block_size {
            return;
        }
        let free = self.is_free(block.offset());
        debug_assert!(!free, "{block} freed twice");
        if free {
            return;
        }
        self.push(block.offset());
        self.stats.on_free(self.free_space());
    }

    fn block_size(&self, _block: BlockId) -> usize {
        self.block_size
    }

    fn free_space(&self) -> usize {
        self.free_count * self.block_size
    }

    fn bytes(&self, block: BlockId) -> &[u8] {
        let start = block.offset() as usize;
        &self.arena[start..start + self.block_size]
    }

    fn bytes_mut(&mut self, block: BlockId) -> &mut [u8] {
        let start = block.offset() as usize;
        &mut self.arena[start..start + self.block_size]
    }
}
