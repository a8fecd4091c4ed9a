//! Bounded event queue with FIFO and LIFO insertion.
//!
//! The ring itself is a block of the kernel's memory class holding one
//! 32-bit slot per event. Constant events are stored by signal with the top
//! bit set, dynamic events by block offset.

use epa_core::{BlockId, EpaError, EpaResult, EventRef, MemClass, Signal, Tick};

use crate::event;

const SLOT: usize = 4;
const CONST_TAG: u32 = 0x8000_0000;

fn encode(evt: EventRef) -> u32 {
    match evt {
        EventRef::Const(signal) => CONST_TAG | signal.raw() as u32,
        EventRef::Dynamic(block) => block.offset(),
    }
}

fn decode(raw: u32) -> EventRef {
    if raw & CONST_TAG != 0 {
        EventRef::Const(Signal::new(raw as u16))
    } else {
        EventRef::Dynamic(BlockId::new(raw))
    }
}

/// Occupancy snapshot of one queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub capacity: u16,
    pub len: u16,
    /// Fewest free slots ever observed
    pub min_free: u16,
}

/// Ring of event handles owned by one agent
#[derive(Debug)]
pub struct EventQueue {
    ring: BlockId,
    capacity: u16,
    head: u16,
    tail: u16,
    len: u16,
    min_free: u16,
}

impl EventQueue {
    /// Allocate a ring for `capacity` events from `mem`
    pub fn init<M: MemClass + ?Sized>(mem: &mut M, capacity: usize) -> EpaResult<Self> {
        if capacity == 0 || capacity > u16::MAX as usize {
            return Err(EpaError::InvalidSize(capacity));
        }
        let ring = mem
            .alloc(capacity * SLOT)
            .ok_or(EpaError::OutOfMemory(capacity * SLOT))?;
        Ok(Self {
            ring,
            capacity: capacity as u16,
            head: 0,
            tail: 0,
            len: 0,
            min_free: capacity as u16,
        })
    }

    /// Destroy every queued event and give the ring back to `mem`
    pub fn deinit<M: MemClass + ?Sized>(mut self, mem: &mut M) -> usize {
        let drained = self.drain(mem);
        mem.free(self.ring);
        drained
    }

    /// Destroy every queued event, keeping the ring. Returns how many were
    /// queued.
    pub fn drain<M: MemClass + ?Sized>(&mut self, mem: &mut M) -> usize {
        let mut drained = 0;
        while let Some(evt) = self.get(mem) {
            event::destroy(mem, evt);
            drained += 1;
        }
        drained
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.capacity,
            len: self.len,
            min_free: self.min_free,
        }
    }

    /// Oldest event, releasing the queue's reference to it
    pub fn get<M: MemClass + ?Sized>(&mut self, mem: &mut M) -> Option<EventRef> {
        if self.is_empty() {
            return None;
        }
        let evt = decode(self.slot(mem, self.head));
        self.head = self.advance(self.head);
        self.len -= 1;
        event::release(mem, evt);
        Some(evt)
    }

    /// Append at the tail.
    ///
    /// A full queue destroys the event instead and reports
    /// [`EpaError::QueueFull`]; the ring itself is left untouched. An event
    /// whose reference count is exhausted is refused with
    /// [`EpaError::RefCountExhausted`].
    pub fn put<M: MemClass + ?Sized>(
        &mut self,
        mem: &mut M,
        evt: EventRef,
        now: Option<Tick>,
    ) -> EpaResult<()> {
        self.admit(mem, evt, now)?;
        let tail = self.tail;
        self.set_slot(mem, tail, encode(evt));
        self.tail = self.advance(tail);
        self.commit();
        Ok(())
    }

    /// Insert at the head so the event is the next one out
    pub fn put_ahead<M: MemClass + ?Sized>(
        &mut self,
        mem: &mut M,
        evt: EventRef,
        now: Option<Tick>,
    ) -> EpaResult<()> {
        self.admit(mem, evt, now)?;
        self.head = self.retreat(self.head);
        let head = self.head;
        self.set_slot(mem, head, encode(evt));
        self.commit();
        Ok(())
    }

    fn admit<M: MemClass + ?Sized>(
        &mut self,
        mem: &mut M,
        evt: EventRef,
        now: Option<Tick>,
    ) -> EpaResult<()> {
        if self.is_full() {
            event::destroy(mem, evt);
            return Err(EpaError::QueueFull);
        }
        if !event::acquire(mem, evt) {
            // Every counted reference is elsewhere, so this never reclaims.
            event::destroy(mem, evt);
            return Err(EpaError::RefCountExhausted);
        }
        if let Some(now) = now {
            event::stamp(mem, evt, now);
        }
        Ok(())
    }

    fn commit(&mut self) {
        self.len += 1;
        let free = self.capacity - self.len;
        if free < self.min_free {
            self.min_free = free;
        }
    }

    fn advance(&self, index: u16) -> u16 {
        if index + 1 == self.capacity {
            0
        } else {
            index + 1
        }
    }

    fn retreat(&self, index: u16) -> u16 {
        if index == 0 {
            self.capacity - 1
        } else {
            index - 1
        }
    }

    fn slot<M: MemClass + ?Sized>(&self, mem: &M, index: u16) -> u32 {
        let at = index as usize * SLOT;
        let bytes = &mem.bytes(self.ring)[at..at + SLOT];
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn set_slot<M: MemClass + ?Sized>(&self, mem: &mut M, index: u16, raw: u32) {
        let at = index as usize * SLOT;
        mem.bytes_mut(self.ring)[at..at + SLOT].copy_from_slice(&raw.to_le_bytes());
    }
}
