//! Signals, reference counts and event handles

use core::fmt;

use crate::mem::BlockId;
use crate::priorities::Priority;

/// Type-safe event signal identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signal(pub u16);

impl Signal {
    /// Empty signal, never handled by application code
    pub const EMPTY: Signal = Signal(0);
    /// Initial transition request
    pub const INIT: Signal = Signal(1);
    /// State entry action
    pub const ENTRY: Signal = Signal(2);
    /// State exit action
    pub const EXIT: Signal = Signal(3);
    /// Superstate probe; handlers answer with their parent state
    pub const SUPER: Signal = Signal(4);

    /// First user-defined signal
    pub const USER: Signal = Signal(5);

    /// Create a new signal from a raw value
    pub const fn new(signal: u16) -> Self {
        Signal(signal)
    }

    /// Get the raw signal value
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Check if this signal is reserved by the kernel
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::USER.0
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Signal::EMPTY => f.write_str("EMPTY"),
            Signal::INIT => f.write_str("INIT"),
            Signal::ENTRY => f.write_str("ENTRY"),
            Signal::EXIT => f.write_str("EXIT"),
            Signal::SUPER => f.write_str("SUPER"),
            Signal(raw) => write!(f, "SIG({raw})"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Signal {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Signal({})", self.0);
    }
}

/// Reference count of a dynamic event plus its reserved flag.
///
/// A reserved event is never reclaimed, whatever its count says. The count
/// never goes above [`RefCount::MAX`]: [`RefCount::acquire`] refuses the
/// extra reference and the caller must not hold on to the event. Going below
/// zero is a programming error caught by a debug assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefCount {
    count: u8,
    reserved: bool,
}

impl RefCount {
    /// Maximum number of live references
    pub const MAX: u8 = 63;

    const RESERVED_BIT: u8 = 0x80;
    const COUNT_MASK: u8 = 0x3F;

    /// Fresh counter of a newly created event
    pub const fn new() -> Self {
        Self {
            count: 0,
            reserved: false,
        }
    }

    /// Counter of a permanently reserved event
    pub const fn reserved() -> Self {
        Self {
            count: 0,
            reserved: true,
        }
    }

    pub const fn count(self) -> u8 {
        self.count
    }

    pub const fn is_reserved(self) -> bool {
        self.reserved
    }

    pub fn set_reserved(&mut self, reserved: bool) {
        self.reserved = reserved;
    }

    /// Record one more holder of the event. Reserved events are not counted.
    ///
    /// Returns `false` when the count is already at [`RefCount::MAX`]; the
    /// reference was not taken.
    #[must_use]
    pub fn acquire(&mut self) -> bool {
        if self.reserved {
            return true;
        }
        if self.count >= Self::MAX {
            return false;
        }
        self.count += 1;
        true
    }

    /// Drop one queue reference. Reserved events are not counted.
    pub fn release(&mut self) {
        if self.reserved {
            return;
        }
        debug_assert!(self.count > 0, "event reference count underflow");
        self.count = self.count.saturating_sub(1);
    }

    /// True when the event may be reclaimed
    pub const fn is_collectable(self) -> bool {
        !self.reserved && self.count == 0
    }

    /// Pack into one byte: bit 7 is the reserved flag, bits 0..=5 the count
    pub const fn pack(self) -> u8 {
        let flag = if self.reserved { Self::RESERVED_BIT } else { 0 };
        flag | (self.count & Self::COUNT_MASK)
    }

    pub const fn unpack(raw: u8) -> Self {
        Self {
            count: raw & Self::COUNT_MASK,
            reserved: raw & Self::RESERVED_BIT != 0,
        }
    }
}

/// Handle to an event.
///
/// Constant events are process-wide and permanently reserved; they only carry
/// a signal. Dynamic events live in a block of the kernel's memory class and
/// carry a header plus payload there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventRef {
    /// Static signal event, never allocated nor freed
    Const(Signal),
    /// Event allocated from a memory class
    Dynamic(BlockId),
}

impl EventRef {
    pub const fn is_const(self) -> bool {
        matches!(self, EventRef::Const(_))
    }

    pub const fn block(self) -> Option<BlockId> {
        match self {
            EventRef::Dynamic(block) => Some(block),
            EventRef::Const(_) => None,
        }
    }
}

/// Constant `INIT` event seeded into every agent's queue
pub const INIT_EVENT: EventRef = EventRef::Const(Signal::INIT);
/// Constant `ENTRY` event
pub const ENTRY_EVENT: EventRef = EventRef::Const(Signal::ENTRY);
/// Constant `EXIT` event
pub const EXIT_EVENT: EventRef = EventRef::Const(Signal::EXIT);
/// Constant superstate probe event
pub const SUPER_EVENT: EventRef = EventRef::Const(Signal::SUPER);
/// Constant `EMPTY` event
pub const EMPTY_EVENT: EventRef = EventRef::Const(Signal::EMPTY);

/// Event as seen by a state handler: the resolved signal plus the handle used
/// to reach the payload through the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    signal: Signal,
    handle: EventRef,
    generator: Option<Priority>,
}

impl Event {
    /// View of a constant event
    pub const fn constant(signal: Signal) -> Self {
        Self {
            signal,
            handle: EventRef::Const(signal),
            generator: None,
        }
    }

    pub const fn new(signal: Signal, handle: EventRef, generator: Option<Priority>) -> Self {
        Self {
            signal,
            handle,
            generator,
        }
    }

    pub const fn signal(&self) -> Signal {
        self.signal
    }

    pub const fn handle(&self) -> EventRef {
        self.handle
    }

    /// Priority of the agent that created the event, if any
    pub const fn generator(&self) -> Option<Priority> {
        self.generator
    }
}
