//! Two-level ready bitmap.
//!
//! `group` has one bit per group of eight priorities; `bits[g]` has one bit
//! per priority inside group `g`. Finding the highest ready priority takes
//! two find-last-set scans regardless of how many agents exist.
//!
//! Invariant: group bit `g` is set exactly when `bits[g]` is non-zero, and
//! bit `i` of `bits[g]` is set exactly when priority `(g << GROUP_SHIFT) | i`
//! is ready. Callers mutate the bitmap inside a critical section.

use epa_core::{bits::fls, EpaError, EpaResult, Priority, GROUPS, MAX_PRIORITIES};

/// Bitmap coordinates of one priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadySlot {
    group: u8,
    mask: u8,
}

impl ReadySlot {
    pub const fn of(priority: Priority) -> Self {
        Self {
            group: priority.group() as u8,
            mask: priority.bit(),
        }
    }

    pub const fn group(self) -> usize {
        self.group as usize
    }

    pub const fn mask(self) -> u8 {
        self.mask
    }
}

/// Ready bitmap plus the priority-indexed agent list
pub struct ReadyQueue<T: Copy> {
    group: u8,
    bits: [u8; GROUPS],
    list: [Option<T>; MAX_PRIORITIES],
}

impl<T: Copy> ReadyQueue<T> {
    pub const fn new() -> Self {
        Self {
            group: 0,
            bits: [0; GROUPS],
            list: [None; MAX_PRIORITIES],
        }
    }

    /// Mark `slot` ready
    pub fn insert(&mut self, slot: ReadySlot) {
        self.bits[slot.group()] |= slot.mask();
        self.group |= 1 << slot.group();
    }

    /// Clear `slot`; the group bit goes only when its last member does
    pub fn remove(&mut self, slot: ReadySlot) {
        debug_assert!(
            self.bits[slot.group()] & slot.mask() != 0,
            "removing a priority that is not ready"
        );
        self.bits[slot.group()] &= !slot.mask();
        if self.bits[slot.group()] == 0 {
            self.group &= !(1 << slot.group());
        }
    }

    pub fn contains(&self, slot: ReadySlot) -> bool {
        self.bits[slot.group()] & slot.mask() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.group == 0
    }

    /// Highest ready priority
    pub fn highest(&self) -> Option<Priority> {
        let group = fls(self.group as u32)?;
        let index = fls(self.bits[group as usize] as u32)?;
        Some(Priority::from_parts(group, index))
    }

    /// Agent registered at `priority`
    pub fn agent(&self, priority: Priority) -> Option<T> {
        self.list.get(priority.raw() as usize).copied().flatten()
    }

    /// Claim the slot for `priority`
    pub fn register(&mut self, priority: Priority, agent: T) -> EpaResult<()> {
        if !priority.is_valid() {
            return Err(EpaError::InvalidPriority(priority.raw()));
        }
        let entry = &mut self.list[priority.raw() as usize];
        debug_assert!(entry.is_none(), "priority {} registered twice", priority);
        if entry.is_some() {
            return Err(EpaError::PriorityInUse(priority.raw()));
        }
        *entry = Some(agent);
        Ok(())
    }

    /// Release the slot for `priority`, clearing its ready bit
    pub fn unregister(&mut self, priority: Priority) -> EpaResult<T> {
        let entry = self
            .list
            .get_mut(priority.raw() as usize)
            .and_then(Option::take)
            .ok_or(EpaError::NotRegistered(priority.raw()))?;
        let slot = ReadySlot::of(priority);
        if self.contains(slot) {
            self.remove(slot);
        }
        Ok(entry)
    }

    /// Check the bitmap invariant
    pub fn is_consistent(&self) -> bool {
        (0..GROUPS).all(|g| (self.group & (1 << g) != 0) == (self.bits[g] != 0))
    }
}

impl<T: Copy> Default for ReadyQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(raw: u8) -> ReadySlot {
        ReadySlot::of(Priority::new(raw).unwrap())
    }

    #[test]
    fn highest_spans_groups() {
        let mut ready: ReadyQueue<u8> = ReadyQueue::new();
        assert_eq!(ready.highest(), None);

        ready.insert(slot(3));
        ready.insert(slot(7));
        ready.insert(slot(42));
        assert_eq!(ready.highest().map(Priority::raw), Some(42));

        ready.remove(slot(42));
        assert_eq!(ready.highest().map(Priority::raw), Some(7));
        ready.remove(slot(7));
        assert_eq!(ready.highest().map(Priority::raw), Some(3));
    }

    #[test]
    fn group_bit_follows_last_member() {
        let mut ready: ReadyQueue<u8> = ReadyQueue::new();
        ready.insert(slot(8));
        ready.insert(slot(9));
        ready.remove(slot(8));
        assert!(!ready.is_empty());
        assert!(ready.is_consistent());
        ready.remove(slot(9));
        assert!(ready.is_empty());
        assert!(ready.is_consistent());
    }

    #[test]
    fn unregister_clears_ready_bit() {
        let mut ready: ReadyQueue<u8> = ReadyQueue::new();
        let p = Priority::new(12).unwrap();
        ready.register(p, 12).unwrap();
        ready.insert(ReadySlot::of(p));

        assert_eq!(ready.unregister(p), Ok(12));
        assert!(ready.is_empty());
        assert_eq!(ready.unregister(p), Err(EpaError::NotRegistered(12)));
    }
}
