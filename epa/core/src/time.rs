//! Tick counter for event timestamps

use core::fmt;

/// Kernel tick counter. Wraps around; compare with [`Tick::is_after`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Tick(u32);

impl Tick {
    /// Zero tick
    pub const ZERO: Self = Self(0);

    /// Create a new tick count
    pub const fn new(ticks: u32) -> Self {
        Self(ticks)
    }

    /// Get the raw tick value
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Next tick, wrapping around
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Calculate elapsed ticks since a previous tick
    pub const fn elapsed_since(self, previous: Tick) -> u32 {
        self.0.wrapping_sub(previous.0)
    }

    /// Check if this tick is after another tick (handles wraparound)
    pub const fn is_after(self, other: Tick) -> bool {
        let delta = self.0.wrapping_sub(other.0);
        delta != 0 && delta < u32::MAX / 2
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick:{}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Tick {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "tick:{}", self.0);
    }
}
