//! Identity types for the graph registry.
//!
//! Slot and operator ids pack a storage index (low 32 bits) and the
//! generation of that storage cell (high 32 bits). A freed cell is reused
//! with the next generation, so a stale id resolves to nothing instead of
//! to somebody else's slot.

use std::fmt;

/// Generational index into `Registry::slots`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct SlotId(pub u64);

impl SlotId {
    const INDEX_BITS: u32 = 32;
    const INDEX_MASK: u64 = (1 << Self::INDEX_BITS) - 1;

    pub const INVALID: SlotId = SlotId(u64::MAX);

    pub fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << Self::INDEX_BITS) | index as u64)
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        (self.0 & Self::INDEX_MASK) as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> Self::INDEX_BITS) as u32
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "SlotId(INVALID)")
        } else if self.generation() == 0 {
            write!(f, "SlotId({})", self.index())
        } else {
            write!(f, "SlotId({}v{})", self.index(), self.generation())
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Generational index into `Registry::operators`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct OperatorId(pub u64);

impl OperatorId {
    const INDEX_BITS: u32 = 32;
    const INDEX_MASK: u64 = (1 << Self::INDEX_BITS) - 1;

    pub const INVALID: OperatorId = OperatorId(u64::MAX);

    pub fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << Self::INDEX_BITS) | index as u64)
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        (self.0 & Self::INDEX_MASK) as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> Self::INDEX_BITS) as u32
    }
}

impl fmt::Debug for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "OperatorId(INVALID)")
        } else if self.generation() == 0 {
            write!(f, "OperatorId({})", self.index())
        } else {
            write!(f, "OperatorId({}v{})", self.index(), self.generation())
        }
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Handle returned when subscribing an observer; used to unsubscribe.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObserverId(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_id() {
        let id = SlotId::new(42, 0);
        assert!(id.is_valid());
        assert_eq!(id.index(), 42);
        assert_eq!(id.generation(), 0);
        assert!(!SlotId::INVALID.is_valid());
        assert_eq!(format!("{:?}", SlotId::INVALID), "SlotId(INVALID)");
    }

    #[test]
    fn test_operator_id() {
        let id = OperatorId::new(0, 0);
        assert!(id.is_valid());
        assert_eq!(id.index(), 0);
        assert_eq!(id.to_string(), "OperatorId(0)");
    }

    #[test]
    fn test_generation_is_part_of_identity() {
        let old = SlotId::new(7, 1);
        let new = SlotId::new(7, 2);
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert_eq!(new.generation(), 2);
        assert_eq!(new.to_string(), "SlotId(7v2)");
        assert!(OperatorId::new(u32::MAX, u32::MAX - 1).is_valid());
    }
}
