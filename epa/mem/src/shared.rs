//! Interrupt-safe wrapper around a memory class.

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};
use epa_core::{BlockId, MemClass};

/// A memory class shared between tasks and interrupt handlers.
///
/// The plain methods open their own critical section. Code that already
/// holds one uses [`SharedMem::with`] and calls the class directly.
pub struct SharedMem<M> {
    inner: Mutex<RefCell<M>>,
}

impl<M: MemClass> SharedMem<M> {
    pub const fn new(mem: M) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(mem)),
        }
    }

    /// Run `f` on the class inside an existing critical section
    pub fn with<R>(&self, cs: CriticalSection<'_>, f: impl FnOnce(&mut M) -> R) -> R {
        f(&mut self.inner.borrow_ref_mut(cs))
    }

    pub fn alloc(&self, size: usize) -> Option<BlockId> {
        critical_section::with(|cs| self.with(cs, |mem| mem.alloc(size)))
    }

    pub fn free(&self, block: BlockId) {
        critical_section::with(|cs| self.with(cs, |mem| mem.free(block)))
    }

    pub fn block_size(&self, block: BlockId) -> usize {
        critical_section::with(|cs| self.with(cs, |mem| mem.block_size(block)))
    }

    pub fn free_space(&self) -> usize {
        critical_section::with(|cs| self.with(cs, |mem| mem.free_space()))
    }

    /// Copy `data` into the start of a block, returning the bytes written
    pub fn write(&self, block: BlockId, data: &[u8]) -> usize {
        critical_section::with(|cs| {
            self.with(cs, |mem| {
                let dst = mem.bytes_mut(block);
                let n = dst.len().min(data.len());
                dst[..n].copy_from_slice(&data[..n]);
                n
            })
        })
    }

    /// Copy the start of a block into `out`, returning the bytes read
    pub fn read(&self, block: BlockId, out: &mut [u8]) -> usize {
        critical_section::with(|cs| {
            self.with(cs, |mem| {
                let src = mem.bytes(block);
                let n = src.len().min(out.len());
                out[..n].copy_from_slice(&src[..n]);
                n
            })
        })
    }

    pub fn into_inner(self) -> M {
        self.inner.into_inner().into_inner()
    }
}
