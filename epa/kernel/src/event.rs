//! Dynamic event lifecycle.
//!
//! A dynamic event is one memory-class block: a fixed header followed by the
//! payload. The functions here assume the caller already holds the critical
//! section and passes the memory class in directly.
//!
//! | offset | field                                    |
//! |--------|------------------------------------------|
//! | 0      | signal (u16 LE)                          |
//! | 2      | reference count, reserved flag in bit 7  |
//! | 3      | generator priority, 0 when none          |
//! | 4      | payload size (u16 LE)                    |
//! | 6      | header magic                             |
//! | 8      | timestamp (u32 LE)                       |

use epa_core::{
    BlockId, EpaError, EpaResult, Event, EventRef, MemClass, Priority, RefCount, Signal, Tick,
};

/// Bytes in front of the payload of every dynamic event
pub const EVENT_HEADER: usize = 12;

/// Largest payload an event can carry
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

const MAGIC: u8 = 0xE5;

/// Decoded header of a dynamic event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub signal: Signal,
    pub refs: RefCount,
    pub generator: Option<Priority>,
    pub size: u16,
    pub timestamp: Tick,
}

impl Header {
    fn read(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes[6], MAGIC, "corrupt event header");
        Self {
            signal: Signal::new(u16::from_le_bytes([bytes[0], bytes[1]])),
            refs: RefCount::unpack(bytes[2]),
            generator: match bytes[3] {
                0 => None,
                raw => Some(Priority::new_unchecked(raw)),
            },
            size: u16::from_le_bytes([bytes[4], bytes[5]]),
            timestamp: Tick::new(u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]])),
        }
    }

    fn write(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&self.signal.raw().to_le_bytes());
        bytes[2] = self.refs.pack();
        bytes[3] = self.generator.map_or(0, Priority::raw);
        bytes[4..6].copy_from_slice(&self.size.to_le_bytes());
        bytes[6] = MAGIC;
        bytes[7] = 0;
        bytes[8..12].copy_from_slice(&self.timestamp.raw().to_le_bytes());
    }
}

/// Allocate an event with a zeroed payload and a zero reference count
pub fn create<M: MemClass + ?Sized>(
    mem: &mut M,
    signal: Signal,
    size: usize,
    generator: Option<Priority>,
    timestamp: Tick,
) -> EpaResult<EventRef> {
    debug_assert!(!signal.is_reserved(), "{} is reserved", signal);
    if size > MAX_PAYLOAD {
        return Err(EpaError::InvalidSize(size));
    }
    let block = mem
        .alloc(EVENT_HEADER + size)
        .ok_or(EpaError::OutOfMemory(EVENT_HEADER + size))?;

    let bytes = mem.bytes_mut(block);
    bytes[..EVENT_HEADER + size].fill(0);
    Header {
        signal,
        refs: RefCount::new(),
        generator,
        size: size as u16,
        timestamp,
    }
    .write(bytes);
    Ok(EventRef::Dynamic(block))
}

/// Header of a dynamic event; `None` for constants
pub fn header<M: MemClass + ?Sized>(mem: &M, evt: EventRef) -> Option<Header> {
    evt.block().map(|block| Header::read(mem.bytes(block)))
}

fn update<M: MemClass + ?Sized>(mem: &mut M, block: BlockId, f: impl FnOnce(&mut Header)) -> Header {
    let bytes = mem.bytes_mut(block);
    let mut header = Header::read(bytes);
    f(&mut header);
    header.write(bytes);
    header
}

/// Signal of any event
pub fn signal<M: MemClass + ?Sized>(mem: &M, evt: EventRef) -> Signal {
    match evt {
        EventRef::Const(signal) => signal,
        EventRef::Dynamic(_) => header(mem, evt).map_or(Signal::EMPTY, |h| h.signal),
    }
}

/// Handler-facing view of an event
pub fn view<M: MemClass + ?Sized>(mem: &M, evt: EventRef) -> Event {
    match header(mem, evt) {
        Some(h) => Event::new(h.signal, evt, h.generator),
        None => Event::new(signal(mem, evt), evt, None),
    }
}

/// Count one more reference. Constants and reserved events are not counted.
///
/// Returns `false`, leaving the header untouched, when the count is exhausted.
#[must_use]
pub fn acquire<M: MemClass + ?Sized>(mem: &mut M, evt: EventRef) -> bool {
    let Some(block) = evt.block() else {
        return true;
    };
    let mut taken = true;
    update(mem, block, |h| taken = h.refs.acquire());
    taken
}

/// Drop one queue reference, never going below zero
pub fn release<M: MemClass + ?Sized>(mem: &mut M, evt: EventRef) {
    if let Some(block) = evt.block() {
        update(mem, block, |h| {
            if h.refs.count() > 0 {
                h.refs.release();
            }
        });
    }
}

/// Reclaim the event if nothing references it any more.
///
/// Returns whether the block went back to the memory class.
pub fn destroy<M: MemClass + ?Sized>(mem: &mut M, evt: EventRef) -> bool {
    let Some(block) = evt.block() else {
        return false;
    };
    let collectable = Header::read(mem.bytes(block)).refs.is_collectable();
    if collectable {
        // Poison the magic so a stale handle trips the debug check.
        mem.bytes_mut(block)[6] = 0;
        mem.free(block);
    }
    collectable
}

/// Drop a reference held outside any queue and reclaim if it was the last
pub fn gc<M: MemClass + ?Sized>(mem: &mut M, evt: EventRef) -> bool {
    release(mem, evt);
    destroy(mem, evt)
}

pub fn set_reserved<M: MemClass + ?Sized>(mem: &mut M, evt: EventRef, reserved: bool) {
    if let Some(block) = evt.block() {
        update(mem, block, |h| h.refs.set_reserved(reserved));
    }
}

pub fn stamp<M: MemClass + ?Sized>(mem: &mut M, evt: EventRef, now: Tick) {
    if let Some(block) = evt.block() {
        update(mem, block, |h| h.timestamp = now);
    }
}

/// Payload bytes; constants carry none
pub fn payload<M: MemClass + ?Sized>(mem: &M, evt: EventRef) -> &[u8] {
    match header(mem, evt) {
        Some(h) => match evt.block() {
            Some(block) => &mem.bytes(block)[EVENT_HEADER..EVENT_HEADER + h.size as usize],
            None => &[],
        },
        None => &[],
    }
}

pub fn payload_mut<M: MemClass + ?Sized>(mem: &mut M, evt: EventRef) -> &mut [u8] {
    match (header(mem, evt), evt.block()) {
        (Some(h), Some(block)) => {
            &mut mem.bytes_mut(block)[EVENT_HEADER..EVENT_HEADER + h.size as usize]
        }
        _ => &mut [],
    }
}
