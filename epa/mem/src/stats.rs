//! Allocation statistics shared by the memory classes.

/// Byte-level usage counters for one memory class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemStats {
    /// Bytes available right after initialisation
    pub capacity: usize,
    /// Bytes currently available
    pub free: usize,
    /// Lowest value `free` has reached
    pub min_free: usize,
    /// Blocks currently handed out
    pub used_blocks: usize,
    /// Allocation requests that could not be satisfied
    pub failed: usize,
}

impl MemStats {
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: capacity,
            min_free: capacity,
            used_blocks: 0,
            failed: 0,
        }
    }

    /// Record a successful allocation leaving `free` bytes available
    pub fn on_alloc(&mut self, free: usize) {
        self.used_blocks += 1;
        self.free = free;
        if free < self.min_free {
            self.min_free = free;
        }
    }

    /// Record a release leaving `free` bytes available
    pub fn on_free(&mut self, free: usize) {
        self.used_blocks = self.used_blocks.saturating_sub(1);
        self.free = free;
    }

    pub fn on_fail(&mut self) {
        self.failed += 1;
    }

    /// True when no block is handed out
    pub const fn is_idle(&self) -> bool {
        self.used_blocks == 0
    }

    /// Share of the capacity in use, as a percentage (0-100)
    pub fn utilization(&self) -> u8 {
        if self.capacity == 0 {
            0
        } else {
            (((self.capacity - self.free.min(self.capacity)) * 100) / self.capacity) as u8
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for MemStats {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "MemStats{{ capacity: {}, free: {}, min_free: {}, used: {}, failed: {} }}",
            self.capacity,
            self.free,
            self.min_free,
            self.used_blocks,
            self.failed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_low_watermark() {
        let mut stats = MemStats::new(100);
        assert!(stats.is_idle());

        stats.on_alloc(60);
        stats.on_alloc(20);
        assert_eq!(stats.min_free, 20);
        assert_eq!(stats.utilization(), 80);

        stats.on_free(60);
        stats.on_free(100);
        assert_eq!(stats.free, 100);
        assert_eq!(stats.min_free, 20);
        assert!(stats.is_idle());
    }
}
