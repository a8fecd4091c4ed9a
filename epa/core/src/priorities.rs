//! Priority management for agents

use core::fmt;
use crate::{EpaError, EpaResult};

/// Number of priority levels, including the reserved idle level 0
pub const MAX_PRIORITIES: usize = 64;

/// Bits per ready-bitmap word
pub const GROUP_BITS: usize = 8;

/// Shift that turns a priority into its ready-bitmap group index
pub const GROUP_SHIFT: u32 = 3;

/// Number of ready-bitmap groups
pub const GROUPS: usize = MAX_PRIORITIES / GROUP_BITS;

/// Type-safe priority level of an agent.
///
/// Higher numbers are more urgent. Priority 0 is reserved for the idle
/// context, so valid agent priorities are `1..MAX_PRIORITIES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    /// Lowest agent priority
    pub const MIN: Priority = Priority(1);

    /// Highest agent priority
    pub const MAX: Priority = Priority(MAX_PRIORITIES as u8 - 1);

    /// Idle level, never assigned to an agent
    pub const IDLE: Priority = Priority(0);

    /// Create a new priority level
    pub fn new(priority: u8) -> EpaResult<Self> {
        if priority == 0 || priority as usize >= MAX_PRIORITIES {
            Err(EpaError::InvalidPriority(priority))
        } else {
            Ok(Priority(priority))
        }
    }

    /// Create priority without validation (const fn)
    pub const fn new_unchecked(priority: u8) -> Self {
        Priority(priority)
    }

    /// Get the raw priority value
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Check if this priority may be given to an agent
    pub const fn is_valid(self) -> bool {
        self.0 > 0 && (self.0 as usize) < MAX_PRIORITIES
    }

    /// Ready-bitmap group this priority belongs to
    pub const fn group(self) -> usize {
        (self.0 >> GROUP_SHIFT) as usize
    }

    /// Bit of this priority inside its group word
    pub const fn bit(self) -> u8 {
        1 << (self.0 & (GROUP_BITS as u8 - 1))
    }

    /// Rebuild a priority from its group and bit index
    pub const fn from_parts(group: u32, index: u32) -> Self {
        Priority(((group << GROUP_SHIFT) | index) as u8)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Priority({})", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Priority {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Priority({})", self.0);
    }
}

/// Macro to create compile-time priority constants
#[macro_export]
macro_rules! priority {
    ($value:literal) => {{
        const _: () = assert!($value > 0 && $value < $crate::MAX_PRIORITIES);
        $crate::Priority::new_unchecked($value)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_creation() {
        assert!(Priority::new(0).is_err());
        assert!(Priority::new(1).is_ok());
        assert!(Priority::new(63).is_ok());
        assert_eq!(Priority::new(64), Err(EpaError::InvalidPriority(64)));
    }

    #[test]
    fn test_group_and_bit() {
        let p = Priority::new(13).unwrap();
        assert_eq!(p.group(), 1);
        assert_eq!(p.bit(), 1 << 5);
        assert_eq!(Priority::from_parts(1, 5), p);
    }
}
